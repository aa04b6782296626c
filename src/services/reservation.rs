//! Board reservation.
//!
//! A test run can reserve the board so that other drivers see it as busy.
//! The state belongs to the accept loop and is handed to each dispatch.

/// Lock value reported while reserved.
pub const RESERVED_LOCK: u32 = 999;

/// Lock value reported while free.
pub const UNRESERVED_LOCK: u32 = 888;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reservation {
    Reserved,
    #[default]
    Unreserved,
}

impl Reservation {
    pub fn is_reserved(&self) -> bool {
        *self == Reservation::Reserved
    }

    /// Reserve the board. Returns `false` if it already was.
    pub fn reserve(&mut self) -> bool {
        let changed = !self.is_reserved();
        *self = Reservation::Reserved;
        changed
    }

    /// Release the board. Returns `false` if it was not reserved.
    pub fn release(&mut self) -> bool {
        let changed = self.is_reserved();
        *self = Reservation::Unreserved;
        changed
    }

    pub fn lock_value(&self) -> u32 {
        match self {
            Reservation::Reserved => RESERVED_LOCK,
            Reservation::Unreserved => UNRESERVED_LOCK,
        }
    }
}
