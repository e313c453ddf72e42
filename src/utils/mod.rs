//! Utilities to implement the readiness tracking of this crate.

mod wakers;

pub(crate) use wakers::WakerVec;
