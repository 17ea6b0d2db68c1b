//! Integration tests for the deployment client


mod test_cache;
mod test_mutations;
mod test_session;
