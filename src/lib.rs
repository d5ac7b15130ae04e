pub mod config;
pub mod error;
pub mod state;
pub mod db;
pub mod router;

pub mod crypto {
    pub mod keys;
    pub mod nonce;
}

pub mod models {
    pub mod audit;
    pub mod challenge;
    pub mod credential;
    pub mod feedback;
    pub mod nonce;
    pub mod scoring;
    pub mod session;
}

pub mod repositories {
    pub mod audit;
    pub mod memory;
    pub mod nonce;
    pub mod result;
    pub mod session;
    pub mod store;
    pub mod token;
}

pub mod services {
    pub mod analyzer;
    pub mod audit;
    pub mod challenges;
    pub mod credentials;
    pub mod nonces;
    pub mod orchestrator;
    pub mod scoring;
    pub mod sessions;
    pub mod sweep;
}

pub mod handlers {
    pub mod audit;
    pub mod health;
    pub mod token;
    pub mod verify;
}

pub mod middleware_layer {
    pub mod audit_key;
}

pub mod validation {
    pub mod verify;
}
