//! Pure state machine for the payment/task handshake
//!
//! No I/O happens here. The driver in [`crate::handshake`] executes the
//! actions and feeds each remote result back in as an event.
//!
//! - Pure function: transition(state, event) -> (state, actions)
//! - `AwaitingPayment` and `Created` are pass-through steps, resolved inside
//!   the transition that enters them
//! - Invalid transitions go to Failed (never panic)

use std::path::PathBuf;
use xcat_core::{HandshakeFailure, TaskId, ToolCallResult, UNKNOWN_ERROR};

use crate::payment::{decode_challenge, extract_challenge, PaymentChallenge};

/// Handshake state
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    /// Nothing sent yet
    Idle,
    /// First `create_crawl_task` in flight
    Creating,
    /// Challenge decoded, waiting for payment evidence
    CollectingProof { quote_id: String },
    /// `x402_topup` in flight
    ToppingUp { quote_id: String },
    /// Second `create_crawl_task` in flight, same idempotency key
    Retrying,
    /// Waiting for `has_result`
    Polling { task_id: TaskId },
    /// `get_result_download_url` in flight
    FetchingDownload { task_id: TaskId },
    /// Artifact transfer in flight
    Downloading {
        task_id: TaskId,
        download_url: String,
    },
    /// Artifact saved
    Done {
        task_id: TaskId,
        download_url: String,
        path: PathBuf,
    },
    /// Handshake aborted
    Failed { failure: HandshakeFailure },
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done { .. } | State::Failed { .. })
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Begin the handshake
    Start,
    /// Normalized `create_crawl_task` result (first call or retry)
    CreateReturned(ToolCallResult),
    /// Payment proof built and encoded
    ProofReady { payment_signature_b64: String },
    /// Network or evidence could not be obtained
    ProofUnavailable(HandshakeFailure),
    /// Normalized `x402_topup` result
    TopupReturned(ToolCallResult),
    /// Normalized `get_task_status` result
    StatusReturned(ToolCallResult),
    /// Polling deadline passed before the result was ready
    DeadlineElapsed { waited_secs: u64 },
    /// Normalized `get_result_download_url` result
    DownloadUrlReturned(ToolCallResult),
    /// Artifact written to disk
    Downloaded { path: PathBuf },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Call `create_crawl_task` with the run's fixed arguments
    CreateTask,
    /// Resolve network and evidence, then build the proof
    CollectProof { challenge: PaymentChallenge },
    /// Call `x402_topup`
    TopUp {
        quote_id: String,
        payment_signature_b64: String,
    },
    /// Call `get_task_status`, sleeping the poll interval first when `wait`
    PollStatus { task_id: TaskId, wait: bool },
    /// Call `get_result_download_url`
    FetchDownloadUrl { task_id: TaskId },
    /// Stream the artifact to the task's result file
    Download {
        task_id: TaskId,
        download_url: String,
    },
    /// Log activity
    Log { message: String },
}

/// Pure state transition function
///
/// # Invalid Transitions
/// Any invalid transition results in a Failed state with an
/// `InvalidTransition` failure. This function never panics.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        (State::Idle, Event::Start) => (
            State::Creating,
            vec![
                Action::Log {
                    message: "Creating crawl task".to_string(),
                },
                Action::CreateTask,
            ],
        ),

        (State::Creating, Event::CreateReturned(result)) => {
            if result.ok {
                enter_created(&result)
            } else if result.is_payment_required() {
                enter_awaiting_payment(&result)
            } else {
                fail(HandshakeFailure::CreateFailed {
                    code: failure_code(&result),
                })
            }
        }

        (State::CollectingProof { quote_id }, Event::ProofReady { payment_signature_b64 }) => {
            let actions = vec![
                Action::Log {
                    message: format!("Submitting top-up for quote {}", quote_id),
                },
                Action::TopUp {
                    quote_id: quote_id.clone(),
                    payment_signature_b64,
                },
            ];
            (State::ToppingUp { quote_id }, actions)
        }

        (State::CollectingProof { .. }, Event::ProofUnavailable(failure)) => fail(failure),

        (State::ToppingUp { quote_id }, Event::TopupReturned(result)) => {
            if result.ok {
                let actions = vec![
                    Action::Log {
                        message: format!("Top-up accepted for quote {}, retrying create", quote_id),
                    },
                    Action::CreateTask,
                ];
                (State::Retrying, actions)
            } else {
                fail(HandshakeFailure::TopupFailed {
                    code: failure_code(&result),
                })
            }
        }

        (State::Retrying, Event::CreateReturned(result)) => {
            if result.ok {
                enter_created(&result)
            } else {
                fail(HandshakeFailure::RetryFailed {
                    code: failure_code(&result),
                })
            }
        }

        (State::Polling { task_id }, Event::StatusReturned(result)) => {
            if result.is_ready() {
                let actions = vec![
                    Action::Log {
                        message: format!("Task {} has a result", task_id),
                    },
                    Action::FetchDownloadUrl { task_id },
                ];
                (State::FetchingDownload { task_id }, actions)
            } else {
                // Not ready, or a transient ok:false; keep waiting until the deadline
                (
                    State::Polling { task_id },
                    vec![Action::PollStatus { task_id, wait: true }],
                )
            }
        }

        (State::Polling { task_id }, Event::DeadlineElapsed { waited_secs }) => {
            fail(HandshakeFailure::Timeout {
                task_id: task_id.to_string(),
                waited_secs,
            })
        }

        (State::FetchingDownload { task_id }, Event::DownloadUrlReturned(result)) => {
            match result.download_url.filter(|_| result.ok) {
                Some(download_url) => {
                    let actions = vec![Action::Download {
                        task_id,
                        download_url: download_url.clone(),
                    }];
                    (
                        State::Downloading {
                            task_id,
                            download_url,
                        },
                        actions,
                    )
                }
                None => fail(HandshakeFailure::MissingDownloadUrl),
            }
        }

        (
            State::Downloading {
                task_id,
                download_url,
            },
            Event::Downloaded { path },
        ) => {
            let actions = vec![Action::Log {
                message: format!("Task {} saved to {}", task_id, path.display()),
            }];
            (
                State::Done {
                    task_id,
                    download_url,
                    path,
                },
                actions,
            )
        }

        // Terminal states - no valid transitions
        (State::Done { task_id, .. }, event) => fail(HandshakeFailure::InvalidTransition(format!(
            "Done (task {}) cannot handle {:?}",
            task_id, event
        ))),

        (State::Failed { failure }, event) => fail(HandshakeFailure::InvalidTransition(format!(
            "Failed ({}) cannot handle {:?}",
            failure, event
        ))),

        // All other invalid transitions
        (state, event) => fail(HandshakeFailure::InvalidTransition(format!(
            "{:?} cannot handle {:?}",
            state, event
        ))),
    }
}

/// Decode the challenge carried by a `PAYMENT_REQUIRED` result
fn enter_awaiting_payment(result: &ToolCallResult) -> (State, Vec<Action>) {
    let details = result
        .error
        .as_ref()
        .map(|e| e.details.clone())
        .unwrap_or_default();

    let challenge = match decode_challenge(&details).and_then(|raw| extract_challenge(&raw)) {
        Ok(challenge) => challenge,
        Err(failure) => return fail(failure),
    };

    let actions = vec![
        Action::Log {
            message: format!("Payment required for quote {}", challenge.quote_id),
        },
        Action::CollectProof {
            challenge: challenge.clone(),
        },
    ];
    (
        State::CollectingProof {
            quote_id: challenge.quote_id,
        },
        actions,
    )
}

/// Extract the task handle from a successful create
fn enter_created(result: &ToolCallResult) -> (State, Vec<Action>) {
    match result.task_id {
        Some(task_id) => (
            State::Polling { task_id },
            vec![
                Action::Log {
                    message: format!("Task {} created, polling for result", task_id),
                },
                Action::PollStatus {
                    task_id,
                    wait: false,
                },
            ],
        ),
        None => fail(HandshakeFailure::MissingTaskId),
    }
}

fn fail(failure: HandshakeFailure) -> (State, Vec<Action>) {
    let actions = vec![Action::Log {
        message: format!("Handshake failed: {}", failure),
    }];
    (State::Failed { failure }, actions)
}

fn failure_code(result: &ToolCallResult) -> String {
    result.error_code().unwrap_or(UNKNOWN_ERROR).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde_json::json;
    use xcat_core::{ErrorInfo, PAYMENT_REQUIRED};

    fn created(task_id: i64) -> ToolCallResult {
        ToolCallResult {
            task_id: Some(TaskId(task_id)),
            ..ToolCallResult::success()
        }
    }

    fn failed(code: &str) -> ToolCallResult {
        ToolCallResult::failure(ErrorInfo::new(code))
    }

    fn payment_required(challenge: serde_json::Value) -> ToolCallResult {
        let mut error = ErrorInfo::new(PAYMENT_REQUIRED);
        error.details.insert(
            "payment_required_b64".to_string(),
            json!(STANDARD.encode(challenge.to_string())),
        );
        ToolCallResult::failure(error)
    }

    fn status(has_result: bool) -> ToolCallResult {
        ToolCallResult {
            has_result: Some(has_result),
            ..ToolCallResult::success()
        }
    }

    fn download_url(url: &str) -> ToolCallResult {
        ToolCallResult {
            download_url: Some(url.to_string()),
            ..ToolCallResult::success()
        }
    }

    fn failure_of(state: &State) -> Option<&HandshakeFailure> {
        match state {
            State::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    #[test]
    fn test_happy_path_without_payment() {
        let (state, actions) = transition(State::Idle, Event::Start);
        assert_eq!(state, State::Creating);
        assert!(matches!(actions[1], Action::CreateTask));

        // Creating -> Created -> Polling
        let (state, actions) = transition(state, Event::CreateReturned(created(42)));
        assert_eq!(state, State::Polling { task_id: TaskId(42) });
        assert!(actions.contains(&Action::PollStatus {
            task_id: TaskId(42),
            wait: false
        }));

        // Not ready yet
        let (state, actions) = transition(state, Event::StatusReturned(status(false)));
        assert_eq!(state, State::Polling { task_id: TaskId(42) });
        assert_eq!(
            actions,
            vec![Action::PollStatus {
                task_id: TaskId(42),
                wait: true
            }]
        );

        // Ready -> FetchingDownload
        let (state, actions) = transition(state, Event::StatusReturned(status(true)));
        assert_eq!(state, State::FetchingDownload { task_id: TaskId(42) });
        assert!(actions.contains(&Action::FetchDownloadUrl { task_id: TaskId(42) }));
        assert!(!actions.iter().any(|a| matches!(a, Action::PollStatus { .. })));

        let (state, actions) =
            transition(state, Event::DownloadUrlReturned(download_url("https://x/r.xlsx")));
        assert!(matches!(state, State::Downloading { .. }));
        assert_eq!(
            actions,
            vec![Action::Download {
                task_id: TaskId(42),
                download_url: "https://x/r.xlsx".to_string()
            }]
        );

        let (state, _) = transition(
            state,
            Event::Downloaded {
                path: PathBuf::from("task_42.xlsx"),
            },
        );
        assert_eq!(
            state,
            State::Done {
                task_id: TaskId(42),
                download_url: "https://x/r.xlsx".to_string(),
                path: PathBuf::from("task_42.xlsx"),
            }
        );
        assert!(state.is_terminal());
    }

    #[test]
    fn test_payment_branch() {
        let challenge = json!({"quote_id": "q1", "accepts": {"base": {"payTo": "0xabc"}}});
        let (state, actions) =
            transition(State::Creating, Event::CreateReturned(payment_required(challenge)));
        assert_eq!(
            state,
            State::CollectingProof {
                quote_id: "q1".to_string()
            }
        );
        let collected = actions.iter().find_map(|a| match a {
            Action::CollectProof { challenge } => Some(challenge),
            _ => None,
        });
        assert_eq!(collected.map(|c| c.quote_id.as_str()), Some("q1"));

        let (state, actions) = transition(
            state,
            Event::ProofReady {
                payment_signature_b64: "cHJvb2Y=".to_string(),
            },
        );
        assert_eq!(
            state,
            State::ToppingUp {
                quote_id: "q1".to_string()
            }
        );
        assert!(actions.contains(&Action::TopUp {
            quote_id: "q1".to_string(),
            payment_signature_b64: "cHJvb2Y=".to_string()
        }));

        let (state, actions) = transition(state, Event::TopupReturned(ToolCallResult::success()));
        assert_eq!(state, State::Retrying);
        assert!(actions.contains(&Action::CreateTask));

        let (state, _) = transition(state, Event::CreateReturned(created(7)));
        assert_eq!(state, State::Polling { task_id: TaskId(7) });
    }

    #[test]
    fn test_other_create_error_skips_payment() {
        let (state, actions) =
            transition(State::Creating, Event::CreateReturned(failed("SOME_OTHER_ERROR")));
        assert_eq!(
            failure_of(&state),
            Some(&HandshakeFailure::CreateFailed {
                code: "SOME_OTHER_ERROR".to_string()
            })
        );
        assert!(!actions.iter().any(|a| matches!(a, Action::CollectProof { .. })));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_challenge_failures() {
        let (state, _) = transition(
            State::Creating,
            Event::CreateReturned(ToolCallResult::failure(ErrorInfo::new(PAYMENT_REQUIRED))),
        );
        assert_eq!(failure_of(&state), Some(&HandshakeFailure::MissingChallenge));

        let (state, _) = transition(
            State::Creating,
            Event::CreateReturned(payment_required(json!({"accepts": {}}))),
        );
        assert_eq!(failure_of(&state), Some(&HandshakeFailure::MissingQuote));
    }

    #[test]
    fn test_missing_task_id() {
        let (state, _) = transition(State::Creating, Event::CreateReturned(ToolCallResult::success()));
        assert_eq!(failure_of(&state), Some(&HandshakeFailure::MissingTaskId));

        let (state, _) = transition(State::Retrying, Event::CreateReturned(ToolCallResult::success()));
        assert_eq!(failure_of(&state), Some(&HandshakeFailure::MissingTaskId));
    }

    #[test]
    fn test_proof_unavailable() {
        let (state, _) = transition(
            State::CollectingProof {
                quote_id: "q1".to_string(),
            },
            Event::ProofUnavailable(HandshakeFailure::InvalidNetwork("eth".to_string())),
        );
        assert_eq!(
            failure_of(&state),
            Some(&HandshakeFailure::InvalidNetwork("eth".to_string()))
        );
    }

    #[test]
    fn test_topup_failure() {
        let (state, _) = transition(
            State::ToppingUp {
                quote_id: "q1".to_string(),
            },
            Event::TopupReturned(failed("INVALID_PROOF")),
        );
        assert_eq!(
            failure_of(&state),
            Some(&HandshakeFailure::TopupFailed {
                code: "INVALID_PROOF".to_string()
            })
        );
    }

    #[test]
    fn test_retry_payment_required_again_fails() {
        let (state, actions) = transition(
            State::Retrying,
            Event::CreateReturned(payment_required(json!({"quote_id": "q2"}))),
        );
        assert_eq!(
            failure_of(&state),
            Some(&HandshakeFailure::RetryFailed {
                code: PAYMENT_REQUIRED.to_string()
            })
        );
        assert!(!actions.iter().any(|a| matches!(a, Action::CollectProof { .. })));
    }

    #[test]
    fn test_failure_without_error_code() {
        let result = ToolCallResult {
            ok: false,
            ..ToolCallResult::success()
        };
        let (state, _) = transition(State::Creating, Event::CreateReturned(result));
        assert_eq!(
            failure_of(&state),
            Some(&HandshakeFailure::CreateFailed {
                code: UNKNOWN_ERROR.to_string()
            })
        );
    }

    #[test]
    fn test_polling_keeps_going_on_status_error() {
        let polling = State::Polling { task_id: TaskId(3) };
        let (state, actions) = transition(polling.clone(), Event::StatusReturned(failed("BUSY")));
        assert_eq!(state, polling);
        assert_eq!(
            actions,
            vec![Action::PollStatus {
                task_id: TaskId(3),
                wait: true
            }]
        );
    }

    #[test]
    fn test_deadline_elapsed() {
        let (state, _) = transition(
            State::Polling { task_id: TaskId(3) },
            Event::DeadlineElapsed { waited_secs: 900 },
        );
        assert_eq!(
            failure_of(&state),
            Some(&HandshakeFailure::Timeout {
                task_id: "3".to_string(),
                waited_secs: 900
            })
        );
    }

    #[test]
    fn test_missing_download_url() {
        let fetching = State::FetchingDownload { task_id: TaskId(3) };

        let (state, _) =
            transition(fetching.clone(), Event::DownloadUrlReturned(ToolCallResult::success()));
        assert_eq!(failure_of(&state), Some(&HandshakeFailure::MissingDownloadUrl));

        // A url next to ok:false is not usable
        let mut result = failed("EXPIRED");
        result.download_url = Some("https://x/r.xlsx".to_string());
        let (state, _) = transition(fetching, Event::DownloadUrlReturned(result));
        assert_eq!(failure_of(&state), Some(&HandshakeFailure::MissingDownloadUrl));
    }

    #[test]
    fn test_invalid_transition_never_panics() {
        let (state, _) = transition(State::Idle, Event::StatusReturned(status(true)));
        assert!(matches!(
            failure_of(&state),
            Some(HandshakeFailure::InvalidTransition(_))
        ));

        let (state, _) = transition(State::Creating, Event::Start);
        assert!(matches!(
            failure_of(&state),
            Some(HandshakeFailure::InvalidTransition(_))
        ));

        let (state, _) = transition(
            State::Retrying,
            Event::ProofReady {
                payment_signature_b64: String::new(),
            },
        );
        assert!(matches!(
            failure_of(&state),
            Some(HandshakeFailure::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_terminal_states_reject_all_events() {
        let done = State::Done {
            task_id: TaskId(1),
            download_url: "u".to_string(),
            path: PathBuf::from("task_1.xlsx"),
        };
        let (state, _) = transition(done, Event::Start);
        assert!(matches!(
            failure_of(&state),
            Some(HandshakeFailure::InvalidTransition(_))
        ));

        let failed_state = State::Failed {
            failure: HandshakeFailure::MissingTaskId,
        };
        assert!(failed_state.is_terminal());
        let (state, _) = transition(failed_state, Event::CreateReturned(created(1)));
        assert!(matches!(
            failure_of(&state),
            Some(HandshakeFailure::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_failures_are_logged() {
        let (_, actions) = transition(State::Creating, Event::CreateReturned(failed("X")));
        assert!(matches!(&actions[..], [Action::Log { message }] if message.contains("X")));
    }
}
