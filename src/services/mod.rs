pub mod auth_service;
pub mod codec;
pub mod note_service;
