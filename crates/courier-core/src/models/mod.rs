//! Data models for the delivery-booking backend.
//!
//! This module contains the structures exchanged with the API:
//!
//! - `User` and the login/register/profile payloads
//! - `Order`, `OrderStatus` and the `OrderFilter` used by order lists

pub mod order;
pub mod user;

pub use order::{NewOrder, Order, OrderFilter, OrderResponse, OrderStatus, OrdersResponse};
pub use user::{
    LoginRequest, LoginResponse, MessageResponse, ProfileResponse, ProfileUpdate,
    ProfileUpdateResponse, RegisterRequest, RegisterResponse, User,
};
