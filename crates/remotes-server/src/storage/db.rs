//! SQLite database for the Remotes server.

remotes_core::define_database!(ServerDatabase, "Server database migrations complete");
