pub mod adapters;
pub mod corpus;
pub mod fanout;
pub mod job_manager;
pub mod normalizer;
