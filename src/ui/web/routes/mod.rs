pub(crate) mod jobs;
pub(crate) mod search;
pub(crate) mod status;
