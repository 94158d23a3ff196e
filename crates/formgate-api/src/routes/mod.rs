//! # Route Modules
//!
//! - `messages`: message pages, `GET /message/{category}/{part1}[/{part2}]`.
//! - `signup`: the sample sign-up form, `POST /signup/`.

pub mod messages;
pub mod signup;
