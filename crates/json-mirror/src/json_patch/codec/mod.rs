//! Wire codecs for patch batches.

pub mod json;
