//! End-to-end tests for InferenceGate; see the `tests/` directory
