mod handlers;
mod routes;
mod server;

pub use server::HttpServer;
