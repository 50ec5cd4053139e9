/*
 * inheritor/api - the pure half of node label inheritance: parsing the
 * opt-in annotation of a Pod and computing which labels it should copy
 * from its Node. No I/O lives here.
 */

pub mod directive;
pub use directive::Directive;
pub use directive::DirectiveError;
pub use directive::NODE_LABELS_INHERITED;

pub mod labels;
pub use labels::Labels;
