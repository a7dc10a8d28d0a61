//! Contract tests against a mocked OpenAI-compatible upstream.

mod common;
mod session;
mod upstream;
