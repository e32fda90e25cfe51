pub mod events;
pub mod stripe_client;
