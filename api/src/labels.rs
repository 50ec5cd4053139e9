use crate::directive::Directive;
use std::collections::BTreeMap;

pub type Labels = BTreeMap<String, String>;

/*
 * Computes the label corrections needed so that every key of the directive
 * the node carries has the node's value on the pod.
 *
 * Keys the node doesn't have are left alone on the pod, as is every key
 * outside the directive. An empty result means the pod is already in sync.
 */
pub fn corrections(directive: &Directive, pod_labels: Option<&Labels>, node_labels: Option<&Labels>) -> Labels {
    let mut staged = Labels::new();

    let node_labels = match node_labels {
	Some(labels) => labels,
	None => return staged,
    };

    for key in directive.iter() {
	if let Some(node_value) = node_labels.get(key) {
	    let pod_value = pod_labels.and_then(|labels| labels.get(key));
	    if pod_value != Some(node_value) {
		staged.insert(key.to_string(), node_value.clone());
	    }
	}
    }

    staged
}

/*
 * Merges corrections into a pod label map, creating it when missing.
 */
pub fn apply(pod_labels: &mut Option<Labels>, corrections: &Labels) {
    let labels = pod_labels.get_or_insert_with(Labels::new);
    for (key, value) in corrections {
	labels.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::parse;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
	pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn directive(raw: &str) -> Directive {
	parse(raw).unwrap().unwrap()
    }

    #[test]
    fn copies_missing_label() {
	let node = labels(&[("zone", "us-east-1a"), ("rack", "7")]);
	let staged = corrections(&directive("zone"), Some(&Labels::new()), Some(&node));

	assert_eq!(staged, labels(&[("zone", "us-east-1a")]));
    }

    #[test]
    fn pod_without_labels() {
	let node = labels(&[("zone", "us-east-1a")]);
	let staged = corrections(&directive("zone"), None, Some(&node));

	assert_eq!(staged, labels(&[("zone", "us-east-1a")]));
    }

    #[test]
    fn overwrites_stale_value() {
	let pod = labels(&[("zone", "us-east-1b")]);
	let node = labels(&[("zone", "us-east-1a")]);
	let staged = corrections(&directive("zone"), Some(&pod), Some(&node));

	assert_eq!(staged, labels(&[("zone", "us-east-1a")]));
    }

    #[test]
    fn in_sync_yields_nothing() {
	let pod = labels(&[("zone", "us-east-1a")]);
	let node = labels(&[("zone", "us-east-1a"), ("rack", "7")]);

	assert!(corrections(&directive("zone"), Some(&pod), Some(&node)).is_empty());
    }

    #[test]
    fn keys_missing_on_node_are_untouched() {
	let pod = labels(&[("rack", "3")]);
	let node = labels(&[("zone", "us-east-1a")]);
	let staged = corrections(&directive("zone,rack"), Some(&pod), Some(&node));

	assert_eq!(staged, labels(&[("zone", "us-east-1a")]));
    }

    #[test]
    fn node_without_labels() {
	assert!(corrections(&directive("zone"), None, None).is_empty());
    }

    #[test]
    fn empty_keys_never_match() {
	let node = labels(&[("zone", "a")]);
	assert!(corrections(&directive("x,,"), None, Some(&node)).is_empty());
    }

    #[test]
    fn apply_keeps_unrelated_labels() {
	let mut pod = Some(labels(&[("app", "web"), ("zone", "old")]));
	apply(&mut pod, &labels(&[("zone", "new")]));

	assert_eq!(pod, Some(labels(&[("app", "web"), ("zone", "new")])));
    }

    #[test]
    fn apply_creates_label_map() {
	let mut pod = None;
	apply(&mut pod, &labels(&[("zone", "a")]));

	assert_eq!(pod, Some(labels(&[("zone", "a")])));
    }
}
