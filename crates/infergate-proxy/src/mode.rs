use serde::{Deserialize, Serialize};

/// Operating modes of the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Replay recorded inferences; on a miss, forward to the upstream API
    /// and record the response for future replays
    RecordAndReplay,
    /// Replay recorded inferences only; a miss is an error and the upstream
    /// is never contacted
    ReplayOnly,
}

impl Mode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RecordAndReplay => "record-and-replay",
            Self::ReplayOnly => "replay-only",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_case_wire_form() {
        assert_eq!(serde_json::to_string(&Mode::RecordAndReplay).unwrap(), "\"record-and-replay\"");
        assert_eq!(serde_json::to_string(&Mode::ReplayOnly).unwrap(), "\"replay-only\"");
        assert_eq!(Mode::ReplayOnly.to_string(), "replay-only");
    }
}
