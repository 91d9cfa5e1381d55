//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! All application routes are mounted under `/api/v1`:
//!
//! - **Chat** (`/chat`, `/chat/history`): metered conversation
//! - **Account** (`/account`): balance, tier and subscription mirror
//! - **Billing** (`/billing/checkout`, `/billing/portal`): hosted payment pages
//! - **Webhooks** (`/webhooks/payments`): payment processor events
//! - **Access** (`/access-codes/verify`): invitation codes
//!
//! Documentation is served at `/api/docs`, the raw OpenAPI document at `/api/openapi.json`.

pub mod handlers;
pub mod models;
