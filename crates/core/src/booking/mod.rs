pub mod allocator;
pub mod catalog;
pub mod code;
pub mod gateway;
pub mod memory;
pub mod notify;
pub mod service;

pub use allocator::{
    Admission, AllocationDecision, AllocationError, AllocationRequest, CapacityAllocator,
    RejectionReason,
};
pub use catalog::StaticVenueCatalog;
pub use code::{CodeGenerationError, CodeGenerator, CodeScope, ScopeTag};
pub use gateway::{
    ClientDirectory, CountScope, GatewayError, Notifier, OverlapQuery, OverlapRow,
    ReservationGateway, ReservationUnitOfWork, VenueCatalog,
};
pub use memory::{InMemoryClientDirectory, InMemoryReservationGateway};
pub use notify::LogNotifier;
pub use service::BookingService;
