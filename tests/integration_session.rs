use sdk_analyzer_core::{
    AnalysisState, AnalysisTarget, AnalyzerSettings, AppError, AuthState, Credentials,
    EventEnvelope, SessionEvent, StartOutcome,
};
use sdk_analyzer_core::AnalysisSession;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

fn fixture_settings() -> AnalyzerSettings {
    AnalyzerSettings {
        scripts_dir: PathBuf::from("tests/fixtures"),
        ..AnalyzerSettings::default()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    path
}

fn collect_events(receiver: &mut broadcast::Receiver<EventEnvelope>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = receiver.try_recv() {
        events.push(envelope.event);
    }
    events
}

fn state_changes(events: &[SessionEvent]) -> Vec<AnalysisState> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::StateChanged { state } => Some(state.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn fixture_scripts_exist() {
    assert!(PathBuf::from("tests/fixtures/detect-sdk-ios.sh").is_file());
    assert!(PathBuf::from("tests/fixtures/detect-sdk-android.sh").is_file());
}

#[tokio::test]
async fn local_file_run_skips_downloading_and_completes() {
    let session = AnalysisSession::new(fixture_settings());
    let mut receiver = session.subscribe();

    let outcome = session
        .start(AnalysisTarget::LocalFile(PathBuf::from("/tmp/example.apk")))
        .await
        .expect("start");

    let StartOutcome::Completed(artifacts) = outcome else {
        panic!("expected a completed run, got {:?}", outcome);
    };
    assert_eq!(
        artifacts.report_path.as_deref(),
        Some("/tmp/sdk-analyzer-fixture/report.html")
    );
    assert_eq!(
        artifacts.work_directory.as_deref(),
        Some("/tmp/sdk-analyzer-fixture")
    );
    assert_eq!(session.state().await, AnalysisState::Completed);

    let events = collect_events(&mut receiver);
    let states = state_changes(&events);
    assert_eq!(states.first(), Some(&AnalysisState::Analyzing));
    assert!(!states.contains(&AnalysisState::Downloading));
    assert_eq!(states.last(), Some(&AnalysisState::Completed));

    // No output fragment is delivered after the terminal transition.
    let last_output = events
        .iter()
        .rposition(|event| matches!(event, SessionEvent::Output { .. }))
        .expect("some output");
    let terminal = events
        .iter()
        .position(|event| matches!(event, SessionEvent::StateChanged { state } if state.is_terminal()))
        .expect("terminal transition");
    assert!(last_output < terminal);

    assert!(session.transcript().await.contains("Analyzing frameworks"));
}

#[tokio::test]
async fn failing_run_carries_raw_output_and_reset_recovers() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_script(
        dir.path(),
        "detect-sdk-android.sh",
        "echo 'fatal: unable to unpack APK' 1>&2\nexit 1",
    );
    let session = AnalysisSession::new(AnalyzerSettings {
        scripts_dir: dir.path().to_path_buf(),
        ..AnalyzerSettings::default()
    });

    let error = session
        .start(AnalysisTarget::LocalFile(PathBuf::from("/tmp/example.apk")))
        .await
        .unwrap_err();
    let AppError::Process { exit_code, output } = error else {
        panic!("expected a process failure");
    };
    assert_eq!(exit_code, Some(1));
    assert!(output.contains("fatal: unable to unpack APK"));

    match session.state().await {
        AnalysisState::Failed(reason) => assert!(reason.contains("fatal: unable to unpack APK")),
        other => panic!("expected Failed, got {:?}", other),
    }
    assert!(session.artifacts().await.report_path.is_none());
    assert!(session.artifacts().await.work_directory.is_none());

    session.reset().await.expect("reset");
    assert_eq!(session.state().await, AnalysisState::Idle);
    assert!(session.transcript().await.is_empty());
    assert_eq!(session.auth_state().await, AuthState::NotStarted);
}

#[tokio::test]
async fn cleanup_deletes_the_work_directory_without_touching_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let work_dir = dir.path().join("analysis-work");
    let work_dir_str = work_dir.to_string_lossy().to_string();
    write_script(
        dir.path(),
        "detect-sdk-android.sh",
        &format!(
            "mkdir -p '{work}'\necho 'Analyzing archive'\necho 'Analysis Directory: {work}'\necho 'Full report: {work}/report.html'",
            work = work_dir_str
        ),
    );
    let session = AnalysisSession::new(AnalyzerSettings {
        scripts_dir: dir.path().to_path_buf(),
        ..AnalyzerSettings::default()
    });

    session
        .start(AnalysisTarget::LocalFile(PathBuf::from("/tmp/example.apk")))
        .await
        .expect("start");
    assert!(work_dir.is_dir());

    session.cleanup_work_directory().await.expect("cleanup");
    assert!(!work_dir.exists());
    assert_eq!(session.state().await, AnalysisState::Completed);
    assert!(session.artifacts().await.work_directory.is_none());
}

#[cfg(unix)]
mod with_mock_ipatool {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn make_executable(path: &Path) {
        let mut perms = std::fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).expect("set perms");
    }

    fn remote_fixture(dir: &Path, ipatool_body: &str) -> AnalyzerSettings {
        std::fs::copy(
            "tests/fixtures/detect-sdk-ios.sh",
            dir.join("detect-sdk-ios.sh"),
        )
        .expect("copy ios fixture");
        let ipatool = write_script(dir, "ipatool", ipatool_body);
        make_executable(&ipatool);
        AnalyzerSettings {
            scripts_dir: dir.to_path_buf(),
            ipatool_binary: ipatool.to_string_lossy().to_string(),
            ..AnalyzerSettings::default()
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            email: "user@example.com".to_string(),
            password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn stored_auth_lets_a_remote_run_start_directly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = remote_fixture(
            dir.path(),
            "printf 'email=user@example.com\\033[0m type=keychain\\n'",
        );
        let session = AnalysisSession::new(settings);
        let mut receiver = session.subscribe();

        let email = session.detect_stored_auth().await;
        assert_eq!(email.as_deref(), Some("user@example.com"));
        assert_eq!(session.identity().await.as_deref(), Some("user@example.com"));

        let outcome = session
            .start(AnalysisTarget::AppStoreUrl(
                "https://apps.apple.com/us/app/example/id1234567890".to_string(),
            ))
            .await
            .expect("start");
        assert!(matches!(outcome, StartOutcome::Completed(_)));

        let states = state_changes(&collect_events(&mut receiver));
        let downloading = states
            .iter()
            .position(|state| state == &AnalysisState::Downloading)
            .expect("downloading phase");
        let analyzing = states
            .iter()
            .position(|state| state == &AnalysisState::Analyzing)
            .expect("analyzing phase");
        assert!(downloading < analyzing);
        assert_eq!(states.last(), Some(&AnalysisState::Completed));
    }

    #[tokio::test]
    async fn two_factor_negotiation_resumes_the_parked_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = remote_fixture(
            dir.path(),
            "case \"$*\" in\n*--auth-code*) echo 'authentication successful';;\n*) echo 'please enter 2FA code:'; exit 1;;\nesac",
        );
        let session = AnalysisSession::new(settings);

        let outcome = session
            .start(AnalysisTarget::AppStoreUrl(
                "https://apps.apple.com/us/app/example/id1234567890".to_string(),
            ))
            .await
            .expect("start");
        assert_eq!(outcome, StartOutcome::AuthenticationRequired);
        assert_eq!(session.state().await, AnalysisState::Authenticating);

        // Credentials alone are not enough; the lifecycle stays in
        // Authenticating with no failure.
        let outcome = session.authenticate(&credentials()).await.expect("authenticate");
        assert_eq!(outcome, StartOutcome::AuthenticationRequired);
        assert_eq!(session.state().await, AnalysisState::Authenticating);
        assert_eq!(session.auth_state().await, AuthState::AwaitingOneTimeCode);

        let outcome = session
            .submit_one_time_code(&credentials(), "123456")
            .await
            .expect("submit code");
        let StartOutcome::Completed(artifacts) = outcome else {
            panic!("expected the parked run to complete");
        };
        assert!(artifacts.report_path.is_some());
        assert_eq!(session.state().await, AnalysisState::Completed);
        assert_eq!(session.auth_state().await, AuthState::Authenticated);

        // Reset clears the run but keeps the authentication.
        session.reset().await.expect("reset");
        assert_eq!(session.state().await, AnalysisState::Idle);
        assert_eq!(session.auth_state().await, AuthState::Authenticated);
        assert_eq!(session.identity().await.as_deref(), Some("user@example.com"));
    }

    #[tokio::test]
    async fn wrong_password_fails_the_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = remote_fixture(dir.path(), "echo 'error: invalid password'; exit 1");
        let session = AnalysisSession::new(settings);

        session
            .start(AnalysisTarget::AppStoreUrl(
                "https://apps.apple.com/us/app/example/id1234567890".to_string(),
            ))
            .await
            .expect("start");
        let error = session.authenticate(&credentials()).await.unwrap_err();
        assert!(matches!(error, AppError::Auth(_)));
        assert!(matches!(session.state().await, AnalysisState::Failed(_)));
        assert_eq!(session.auth_state().await, AuthState::AuthFailed);
    }
}
