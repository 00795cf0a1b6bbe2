// SPDX-License-Identifier: MIT
//! Direct-API backend (§4.6): streams a vendor model endpoint directly and
//! runs the client-side tool loop, with no external agent subprocess.

mod session;

pub use session::{ask_options, DirectError, DirectSession, ALLOW_OPTION, DENY_OPTION};
