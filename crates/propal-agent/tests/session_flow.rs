use propal_agent::{
    AgentError, ConversationSession, ExportTargets, InterruptionPolicy, PipelineEvent,
    SessionFlow, SessionRegistry, SessionSettings,
};
use propal_metrics::MetricsError;
use tempfile::TempDir;

fn settings(min_overlap_secs: f64, max_duration_secs: Option<f64>) -> SessionSettings {
    SessionSettings {
        interruption: InterruptionPolicy { min_overlap_secs },
        max_duration_secs,
        ..SessionSettings::default()
    }
}

fn targets(dir: &TempDir) -> ExportTargets {
    ExportTargets {
        export_dir: dir.path().join("sessions"),
        history_file: Some(dir.path().join("voice_agent_metrics.csv")),
    }
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("value should be present");
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

async fn send(session: &mut ConversationSession, events: Vec<PipelineEvent>) -> SessionFlow {
    let mut flow = SessionFlow::Continue;
    for event in events {
        let ts = event.timestamp().unwrap_or(0.0);
        flow = session.handle(event, ts).await;
    }
    flow
}

/// One complete user/agent exchange with speech ending at `end`.
fn exchange(end: f64) -> Vec<PipelineEvent> {
    vec![
        PipelineEvent::SpeechStarted {
            timestamp: Some(end - 1.0),
        },
        PipelineEvent::SpeechEnded {
            timestamp: Some(end),
        },
        PipelineEvent::FinalTranscript {
            text: "what are your opening hours".to_string(),
            timestamp: Some(end + 0.3),
        },
        PipelineEvent::LlmFirstToken {
            turn_id: None,
            timestamp: Some(end + 0.9),
        },
        PipelineEvent::LlmComplete {
            turn_id: None,
            timestamp: Some(end + 1.5),
        },
        PipelineEvent::TtsFirstAudio {
            turn_id: None,
            timestamp: Some(end + 1.7),
        },
    ]
}

#[tokio::test]
async fn complete_exchange_yields_turn_latencies() {
    let mut session = ConversationSession::start("s-1", None, SessionSettings::default());
    assert_eq!(send(&mut session, exchange(10.0)).await, SessionFlow::Continue);

    let turn = session.turn(1).await.unwrap();
    assert_close(turn.metrics.eou_delay, 0.3);
    assert_close(turn.metrics.ttft, 0.6);
    assert_close(turn.metrics.ttfd, 1.2);
    assert_close(turn.metrics.total_latency, 1.7);
    assert!(!turn.record.interrupted);

    let summary = session.summary().await;
    assert_eq!(summary.turn_count, 1);
    assert_eq!(summary.message_count, 1);
    assert_eq!(summary.agent_response_count, 1);
    assert_eq!(summary.target_latency_met_ratio, Some(1.0));
}

#[tokio::test]
async fn speech_during_playback_interrupts_immediately_by_default() {
    let mut session = ConversationSession::start("s-2", None, settings(0.0, None));
    send(&mut session, exchange(10.0)).await;
    send(
        &mut session,
        vec![PipelineEvent::SpeechStarted {
            timestamp: Some(12.0),
        }],
    )
    .await;

    assert!(session.turn(1).await.unwrap().record.interrupted);
    assert!(!session.turn(2).await.unwrap().record.interrupted);
    assert_eq!(session.summary().await.interruption_count, 1);
}

#[tokio::test]
async fn short_overlap_is_not_an_interruption() {
    let mut session = ConversationSession::start("s-3", None, settings(0.5, None));
    send(&mut session, exchange(10.0)).await;
    send(
        &mut session,
        vec![
            PipelineEvent::SpeechStarted {
                timestamp: Some(12.0),
            },
            PipelineEvent::SpeechEnded {
                timestamp: Some(12.2),
            },
        ],
    )
    .await;

    assert!(!session.turn(1).await.unwrap().record.interrupted);
    assert_eq!(session.summary().await.interruption_count, 0);
}

#[tokio::test]
async fn overlap_is_measured_when_playback_finishes_first() {
    let mut session = ConversationSession::start("s-4", None, settings(0.5, None));
    send(&mut session, exchange(10.0)).await;
    send(
        &mut session,
        vec![
            PipelineEvent::SpeechStarted {
                timestamp: Some(12.0),
            },
            PipelineEvent::TtsPlaybackFinished {
                turn_id: None,
                timestamp: Some(12.8),
            },
            PipelineEvent::SpeechEnded {
                timestamp: Some(13.0),
            },
        ],
    )
    .await;

    assert!(session.turn(1).await.unwrap().record.interrupted);
    let second = session.turn(2).await.unwrap();
    assert_eq!(second.record.utterance_end, Some(13.0));
}

#[tokio::test]
async fn speech_after_playback_is_a_new_turn_only() {
    let mut session = ConversationSession::start("s-5", None, settings(0.0, None));
    send(&mut session, exchange(10.0)).await;
    send(
        &mut session,
        vec![
            PipelineEvent::TtsPlaybackFinished {
                turn_id: Some(1),
                timestamp: Some(13.0),
            },
            PipelineEvent::SpeechStarted {
                timestamp: Some(14.0),
            },
        ],
    )
    .await;

    let summary = session.summary().await;
    assert_eq!(summary.turn_count, 2);
    assert_eq!(summary.interruption_count, 0);
}

#[tokio::test]
async fn explicit_turn_id_routes_response_events() {
    let mut session = ConversationSession::start("s-6", None, SessionSettings::default());
    send(&mut session, exchange(10.0)).await;
    send(
        &mut session,
        vec![
            PipelineEvent::SpeechStarted {
                timestamp: Some(20.0),
            },
            PipelineEvent::LlmComplete {
                turn_id: Some(1),
                timestamp: Some(20.5),
            },
        ],
    )
    .await;

    // Turn 1 already had llm_complete at 11.5.
    let first = session.turn(1).await.unwrap();
    assert_eq!(first.record.llm_complete_at, Some(11.5));
    let second = session.turn(2).await.unwrap();
    assert_eq!(second.record.llm_complete_at, None);
}

#[tokio::test]
async fn speech_during_llm_stage_interrupts_the_responding_turn() {
    let mut session = ConversationSession::start("s-12", None, settings(0.0, None));
    send(
        &mut session,
        vec![
            PipelineEvent::SpeechStarted {
                timestamp: Some(9.0),
            },
            PipelineEvent::SpeechEnded {
                timestamp: Some(10.0),
            },
            PipelineEvent::FinalTranscript {
                text: "book a table".to_string(),
                timestamp: Some(10.3),
            },
            PipelineEvent::LlmFirstToken {
                turn_id: None,
                timestamp: Some(10.9),
            },
            PipelineEvent::SpeechStarted {
                timestamp: Some(11.0),
            },
            PipelineEvent::LlmComplete {
                turn_id: None,
                timestamp: Some(11.5),
            },
            PipelineEvent::TtsFirstAudio {
                turn_id: None,
                timestamp: Some(11.7),
            },
        ],
    )
    .await;

    let first = session.turn(1).await.unwrap();
    assert!(first.record.interrupted);
    assert_eq!(first.record.llm_complete_at, None);
    assert_eq!(first.record.tts_first_audio_at, None);
    assert!(!session.turn(2).await.unwrap().record.interrupted);

    let summary = session.summary().await;
    assert_eq!(summary.interruption_count, 1);
    assert_eq!(summary.agent_response_count, 0);
}

#[tokio::test]
async fn long_speech_before_first_audio_interrupts_with_overlap_policy() {
    let mut session = ConversationSession::start("s-13", None, settings(0.5, None));
    let mut events = exchange(10.0);
    // Cut after the first token.
    events.truncate(4);
    events.push(PipelineEvent::SpeechStarted {
        timestamp: Some(11.0),
    });
    events.push(PipelineEvent::SpeechEnded {
        timestamp: Some(11.8),
    });
    send(&mut session, events).await;

    assert!(session.turn(1).await.unwrap().record.interrupted);
    assert_eq!(session.summary().await.interruption_count, 1);
}

#[tokio::test]
async fn extra_transcript_segments_count_one_message() {
    let mut session = ConversationSession::start("s-14", None, SessionSettings::default());
    send(
        &mut session,
        vec![
            PipelineEvent::SpeechStarted {
                timestamp: Some(1.0),
            },
            PipelineEvent::SpeechEnded {
                timestamp: Some(2.0),
            },
            PipelineEvent::FinalTranscript {
                text: "I'd like".to_string(),
                timestamp: Some(2.3),
            },
            PipelineEvent::FinalTranscript {
                text: "a table for two".to_string(),
                timestamp: Some(2.6),
            },
        ],
    )
    .await;

    let turn = session.turn(1).await.unwrap();
    assert_eq!(turn.record.stt_complete_at, Some(2.3));
    let summary = session.summary().await;
    assert_eq!(summary.turn_count, 1);
    assert_eq!(summary.message_count, 1);
}

#[tokio::test]
async fn transcript_without_speech_opens_a_turn() {
    let mut session = ConversationSession::start("s-7", None, SessionSettings::default());
    send(
        &mut session,
        vec![PipelineEvent::FinalTranscript {
            text: "hello".to_string(),
            timestamp: Some(5.0),
        }],
    )
    .await;

    let turn = session.turn(1).await.unwrap();
    assert_eq!(turn.record.stt_complete_at, Some(5.0));
    assert_eq!(turn.metrics.eou_delay, None);
    assert_eq!(session.summary().await.message_count, 1);
}

#[tokio::test]
async fn provider_errors_are_counted_without_ending_the_session() {
    let mut session = ConversationSession::start("s-8", None, SessionSettings::default());
    let flow = send(
        &mut session,
        vec![PipelineEvent::ProviderError {
            provider: "deepgram".to_string(),
            message: "connection reset".to_string(),
            timestamp: Some(1.0),
        }],
    )
    .await;

    assert_eq!(flow, SessionFlow::Continue);
    assert_eq!(session.summary().await.error_count, 1);
}

#[tokio::test]
async fn session_finishes_after_maximum_duration() {
    let mut session = ConversationSession::start("s-9", None, settings(0.0, Some(5.0)));
    let flow = send(
        &mut session,
        vec![
            PipelineEvent::ParticipantConnected {
                participant: "caller".to_string(),
                timestamp: Some(100.0),
            },
            PipelineEvent::SpeechStarted {
                timestamp: Some(105.0),
            },
        ],
    )
    .await;
    assert_eq!(flow, SessionFlow::Continue);
    assert_eq!(session.participant(), Some("caller"));

    let flow = send(
        &mut session,
        vec![PipelineEvent::SpeechEnded {
            timestamp: Some(105.5),
        }],
    )
    .await;
    assert_eq!(flow, SessionFlow::Finish);
}

#[tokio::test]
async fn disconnect_finishes_and_exports() {
    let dir = TempDir::new().unwrap();
    let targets = targets(&dir);
    let mut session = ConversationSession::start("s-10", None, SessionSettings::default());
    send(&mut session, exchange(10.0)).await;

    let flow = send(
        &mut session,
        vec![PipelineEvent::ParticipantDisconnected {
            timestamp: Some(20.0),
        }],
    )
    .await;
    assert_eq!(flow, SessionFlow::Finish);

    // Events queued just before teardown are applied before the export.
    let finished = session.finish(&targets).await;
    assert_eq!(finished.summary.turn_count, 1);
    assert!(finished.summary.ended_at.is_some());
    assert_close(finished.summary.avg_total_latency, 1.7);

    let path = finished.export.as_ref().unwrap();
    assert_eq!(path, &targets.session_file("s-10"));
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.starts_with("turn_id,"));

    let history = std::fs::read_to_string(dir.path().join("voice_agent_metrics.csv")).unwrap();
    assert_eq!(history.lines().count(), 2);
}

#[tokio::test]
async fn failed_export_keeps_metrics_for_retry() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();
    let targets = ExportTargets {
        export_dir: blocker.join("sessions"),
        history_file: None,
    };

    let mut session = ConversationSession::start("s-11", None, SessionSettings::default());
    send(&mut session, exchange(10.0)).await;
    let finished = session.finish(&targets).await;

    assert!(matches!(finished.export, Err(MetricsError::ExportIo { .. })));
    assert_eq!(finished.tracker().turn_count(), 1);

    let retry = dir.path().join("retry.csv");
    assert_eq!(finished.retry_export(&retry).unwrap(), retry);
    assert!(retry.exists());
}

#[tokio::test]
async fn registry_tracks_live_and_finished_sessions() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(SessionSettings::default(), targets(&dir));
    let id = registry.create(Some("caller".to_string()));
    assert_eq!(registry.live_count(), 1);

    for event in exchange(10.0) {
        let ts = event.timestamp().unwrap_or(0.0);
        assert!(registry.dispatch(&id, event, ts).await.unwrap().is_none());
    }
    let finished = registry
        .dispatch(
            &id,
            PipelineEvent::ParticipantDisconnected {
                timestamp: Some(30.0),
            },
            30.0,
        )
        .await
        .unwrap()
        .expect("disconnect finishes the session");
    assert!(finished.export.is_ok());
    assert_eq!(registry.live_count(), 0);

    // Finished sessions stay queryable but accept no more events.
    assert_eq!(registry.summary(&id).await.unwrap().turn_count, 1);
    assert_close(registry.turn(&id, 1).await.unwrap().metrics.ttft, 0.6);
    let err = registry
        .dispatch(&id, PipelineEvent::SpeechStarted { timestamp: None }, 31.0)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::SessionFinished(_)));
    assert!(matches!(
        registry.finish(&id).await.unwrap_err(),
        AgentError::SessionFinished(_)
    ));
    assert!(matches!(
        registry.summary("missing").await.unwrap_err(),
        AgentError::SessionNotFound(_)
    ));
}

#[tokio::test]
async fn finish_all_exports_every_live_session() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(SessionSettings::default(), targets(&dir));
    let ids = [registry.create(None), registry.create(None)];

    let finished = registry.finish_all().await;
    assert_eq!(finished.len(), 2);
    assert_eq!(registry.live_count(), 0);
    for id in &ids {
        assert!(registry.targets().session_file(id).exists());
    }
}

async fn finish_new_session(registry: &SessionRegistry) -> String {
    let id = registry.create(None);
    registry.finish(&id).await.unwrap();
    id
}

#[tokio::test]
async fn oldest_finished_sessions_are_evicted_past_capacity() {
    let dir = TempDir::new().unwrap();
    let registry =
        SessionRegistry::with_finished_capacity(SessionSettings::default(), targets(&dir), 2);

    let first = finish_new_session(&registry).await;
    let second = finish_new_session(&registry).await;
    let third = finish_new_session(&registry).await;

    assert!(matches!(
        registry.summary(&first).await.unwrap_err(),
        AgentError::SessionNotFound(_)
    ));
    assert!(matches!(
        registry
            .dispatch(&first, PipelineEvent::SpeechStarted { timestamp: None }, 1.0)
            .await
            .unwrap_err(),
        AgentError::SessionNotFound(_)
    ));
    assert!(registry.summary(&second).await.is_ok());
    assert!(registry.summary(&third).await.is_ok());
}

#[tokio::test]
async fn failed_exports_are_retained_until_retried() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();
    let failing = ExportTargets {
        export_dir: blocker.join("sessions"),
        history_file: None,
    };
    let registry = SessionRegistry::with_finished_capacity(SessionSettings::default(), failing, 2);

    let failed = registry.create(None);
    assert!(registry.finish(&failed).await.unwrap().export.is_err());
    let also_failed = registry.create(None);
    assert!(registry.finish(&also_failed).await.unwrap().export.is_err());

    // Only failed exports are retained, so the oldest one makes room.
    let third = finish_new_session(&registry).await;
    assert!(registry.summary(&failed).await.is_err());
    assert!(registry.summary(&also_failed).await.is_ok());

    let retry = dir.path().join("retry.csv");
    assert_eq!(registry.retry_export(&also_failed, &retry).unwrap(), retry);
    assert!(retry.exists());
    assert!(matches!(
        registry.retry_export(&failed, dir.path().join("gone.csv")),
        Err(AgentError::SessionNotFound(_))
    ));

    // Once retried it is evicted before the still-failed third session.
    finish_new_session(&registry).await;
    assert!(matches!(
        registry.summary(&also_failed).await.unwrap_err(),
        AgentError::SessionNotFound(_)
    ));
    assert!(registry.summary(&third).await.is_ok());
}
