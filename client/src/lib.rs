//! Todo Book client - a personal todo notebook backed by Supabase.
//!
//! This crate provides the client core: session tracking, CRUD over the
//! user's todos, image attachments, and the editor state machine. It is
//! shell-agnostic; the `todobook` CLI is one consumer.
//!
//! # Architecture
//!
//! The [`session::SessionManager`] gates everything else. Once it has
//! resolved an identity, the [`cache::TodoCache`] loads the collection
//! through the [`repository::TodoRepository`], and re-loads it after every
//! successful mutation. The [`editor::Editor`] writes through the repository
//! and the [`attachment::AttachmentUploader`]. [`app::TodoBook`] wires these
//! together for a single session.
//!
//! Remote collaborators sit behind traits ([`session::IdentityProvider`],
//! [`repository::TodoStore`], [`attachment::ObjectStore`]) with Supabase
//! implementations in [`supabase`] and in-process ones in [`memory`].
//!
//! # Modules
//!
//! - [`app`]: Controller composing session, cache and editor
//! - [`attachment`]: Image upload to the object store
//! - [`cache`]: Snapshot of the user's collection
//! - [`config`]: Configuration from environment variables
//! - [`editor`]: Create/edit state machine and save algorithm
//! - [`error`]: Error types for client operations
//! - [`memory`]: In-process backend for tests
//! - [`repository`]: CRUD boundary against the todo store
//! - [`session`]: Identity tracking and change notifications
//! - [`supabase`]: Supabase Auth, REST and Storage adapters
//! - [`types`]: Todo and identity data types

pub mod app;
pub mod attachment;
pub mod cache;
pub mod config;
pub mod editor;
pub mod error;
pub mod memory;
pub mod repository;
pub mod session;
pub mod supabase;
pub mod types;

pub use app::{Notice, NoticeLevel, TodoBook};
pub use error::{Result, TodoBookError};
pub use types::{AuthSession, Identity, Todo};
