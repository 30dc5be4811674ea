//! Shared fixtures for the Moblink integration tests.
