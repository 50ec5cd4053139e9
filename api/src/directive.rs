use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;

/*
 * The annotation a Pod carries to opt into node label inheritance, e.g:
 *
 *   metadata:
 *     annotations:
 *       nodeLabelsInherited: "topology.kubernetes.io/zone,rack"
 */
pub const NODE_LABELS_INHERITED: &str = "nodeLabelsInherited";

const TRIM_CHARS: &[char] = &[' ', '\n', '\r'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {

    #[error("failed to parse node labels: {0}")]
    Malformed(String),
}

/*
 * The ordered list of node label keys a Pod asked to inherit.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    keys: Vec<String>,
}

impl Directive {

    pub fn keys(&self) -> &[String] {
	&self.keys
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
	self.keys.iter().map(String::as_str)
    }
}

/*
 * Parse the raw annotation value.
 *
 * Only the first raw token is checked for emptiness; later tokens are trimmed
 * and kept even when they end up empty, they simply never match a node label.
 */
pub fn parse(raw: &str) -> Result<Option<Directive>, DirectiveError> {
    if raw.is_empty() {
	return Ok(None);
    }

    let tokens: Vec<&str> = raw.split(',').collect();
    match tokens.first() {
	Some(first) if !first.is_empty() => {},
	_ => return Err(DirectiveError::Malformed(raw.to_string())),
    }

    let keys = tokens
	.into_iter()
	.map(|token| token.trim_matches(TRIM_CHARS).to_string())
	.collect();

    Ok(Some(Directive{ keys }))
}

/*
 * Extract the inheritance directive from a Pod's annotations. A Pod without
 * the annotation has no directive, which is not an error.
 */
pub fn extract(pod: &Pod) -> Result<Option<Directive>, DirectiveError> {
    let raw = pod.metadata.annotations
	.as_ref()
	.and_then(|annotations| annotations.get(NODE_LABELS_INHERITED));

    match raw {
	Some(raw) => parse(raw),
	None => Ok(None),
    }
}
