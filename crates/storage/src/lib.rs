#![forbid(unsafe_code)]

pub mod gateway;
pub mod sqlite;

pub use gateway::{
    ChallengeGateway, GatewayError, GatewayOp, InMemoryGateway, PhotoStore, PhotoUpload,
};
