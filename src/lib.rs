// src/lib.rs

use std::sync::Arc;

use config::AppConfig;
use services::dialogue::DialogueEngine;
use services::messaging::MessageSender;
use services::otp::OtpService;
use services::session_store::SessionStore;
use services::transaction_log::TransactionLog;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sessions: SessionStore,
    pub otp: OtpService,
    pub tx_log: TransactionLog,
    pub messaging: Arc<dyn MessageSender>,
    pub dialogue: DialogueEngine,
}

pub mod services {
    pub mod command_parser;
    pub mod dialogue;
    pub mod messaging;
    pub mod otp;
    pub mod replies;
    pub mod session_store;
    pub mod transaction_log;
    pub mod wallet_api;
}

pub mod models {
    pub mod api;
    pub mod session;
    pub mod transaction;
    pub mod webhook;
}

pub mod handlers {
    pub mod admin;
    pub mod health;
    pub mod wallet_webhook;
    pub mod webhook;
}

pub mod config;
pub mod error;
