// WebSocket module
//
// - routes: router setup (`/ws`, `/api/ws`, health, metrics)
// - connection: per-socket handshake, send task, and receive loop

mod connection;
mod routes;

pub use routes::create_router;
