// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message queue errors.
//!
//! Registration errors are returned to the adapter that drives the registry
//! and logged; dispatch errors never reach the sender of a message.

use thiserror::Error;

/// Message queue errors.
#[derive(Debug, Error)]
pub enum MqError {
    /// Endpoint id is missing or blank after trimming.
    #[error("Invalid endpoint id: {0:?}")]
    InvalidId(String),

    /// Endpoint id is already held by another registration.
    #[error("Endpoint [{0}] has already been registered")]
    DuplicateId(String),

    /// Update tried to move an endpoint onto an id that is already taken.
    /// The endpoint has been unregistered.
    #[error("Endpoint [{from}] is unregistered: existing id={to}")]
    RenameConflict { from: String, to: String },

    /// Message could not be handed to, or processed by, its endpoint.
    #[error("Endpoint [{endpoint}] failed to consume message #{message}: {reason}")]
    DispatchFailure {
        endpoint: String,
        message: u64,
        reason: String,
    },

    /// Held message found no endpoint in time.
    #[error("Message #{message} to [{destination}] timed out")]
    Timeout { destination: String, message: u64 },

    /// Producer used after its endpoint was unregistered or the queue dropped.
    #[error("Producer of endpoint [{0}] is closed")]
    ProducerClosed(String),

    /// Executor refused the task.
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Executor submission errors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor is shut down")]
    ShutDown,

    #[error("Task rejected: {0}")]
    Rejected(String),
}

/// Error returned by a consumer that could not process a message.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConsumeError(pub String);

impl ConsumeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, MqError>;
