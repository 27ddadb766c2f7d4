pub(crate) mod refresher;
pub(crate) mod worker;
