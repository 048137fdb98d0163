pub mod car;
pub mod firehose;
pub mod ipld;
pub mod repo;
