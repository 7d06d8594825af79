//! Scenario tests: scheduler and retrieval gateway against scripted fakes.

mod retrieval;
mod support;
