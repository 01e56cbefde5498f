// # In-Memory Backends
//
// Implementations of the backend traits that keep everything in process.
//
// They enforce the same uniqueness rules as the real services (one recordset
// per `(zone, name, type)`, one IPAM object per address) so reconcilers
// behave identically against them. Used by the contract tests and for
// dry runs of the daemon.

pub mod compute;
pub mod dns;
pub mod ipam;

pub use compute::MemoryComputeService;
pub use dns::MemoryDnsService;
pub use ipam::MemoryIpam;
