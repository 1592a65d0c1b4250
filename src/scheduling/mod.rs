// Pure booking arithmetic: no DB access, no clock reads. Route handlers load
// rows, convert them to the types here, and make decisions from the results.

pub mod conflict;
pub mod slots;
pub mod workload;
