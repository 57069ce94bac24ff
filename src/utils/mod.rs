mod plurals;

pub use plurals::{counted, pluralize};
