use serde::Serialize;

/// Lifecycle signal inferred from the external tool's textual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleSignal {
    DownloadStarted,
    AnalysisStarted,
    ReportGenerating,
    OneTimeCodeRequired,
    AuthSucceeded,
}

/// The whole matching vocabulary, as data. The external tools are black
/// boxes whose wording can drift, so every substring the controller
/// reacts to lives in this one table.
pub const SIGNAL_VOCABULARY: &[(LifecycleSignal, &[&str])] = &[
    (LifecycleSignal::DownloadStarted, &["Downloading"]),
    (LifecycleSignal::AnalysisStarted, &["Analyzing", "Extracting"]),
    (LifecycleSignal::ReportGenerating, &["Generating"]),
    (
        LifecycleSignal::OneTimeCodeRequired,
        // ipatool has used both phrasings for the 2FA prompt.
        &["enter 2FA code", "failed to read auth code"],
    ),
    (LifecycleSignal::AuthSucceeded, &["success"]),
];

/// Best-effort substring matching of one output fragment. Pure: the
/// caller owns all state. Multiple signals may fire from one fragment;
/// each fires at most once.
pub fn classify(fragment: &str) -> Vec<LifecycleSignal> {
    SIGNAL_VOCABULARY
        .iter()
        .filter(|(_, markers)| markers.iter().any(|marker| fragment.contains(marker)))
        .map(|(signal, _)| *signal)
        .collect()
}
