//! # xcat-orchestrator
//!
//! Payment-retry handshake for the Xcatcher client.
//!
//! This crate provides:
//! - x402 challenge decoding and payment proof building
//! - A pure state machine for create, pay, retry, poll and download
//! - The async driver that runs it over a [`xcat_agent::Toolset`]

mod handshake;
mod observer;
mod payment;
mod state_machine;

pub use handshake::{EvidencePrompt, Handshake, HandshakeReport};
pub use observer::{HandshakeObserver, NoopObserver};
pub use payment::{
    decode_challenge, decode_challenge_b64, extract_challenge, PaymentChallenge, PaymentProof,
    MIN_TOPUP_USDC, X402_VERSION,
};
pub use state_machine::{transition, Action, Event, State};
