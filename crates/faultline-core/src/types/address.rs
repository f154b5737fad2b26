//! Code and stack address type.

use std::fmt;
use std::ops::{Add, BitAnd, Sub};

/// Strongly typed address inside the current process
///
/// Fault records, register contexts and profile samples all carry addresses.
/// Wrapping them keeps a fault's data address from being confused with the
/// instruction address, or with a plain count of words.
///
/// Addresses are always 64 bits wide, even on 32-bit targets; the x86 register
/// accessors truncate on write.
///
/// ## Example
///
/// ```rust
/// use faultline_core::types::Address;
///
/// let sp = Address::new(0x7ff0_1238);
/// assert_eq!(sp.align_down(16).value(), 0x7ff0_1230);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value (usable in const contexts).
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the null address.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Round down to a multiple of `alignment`, which must be a power of two.
    ///
    /// ```rust
    /// use faultline_core::types::Address;
    ///
    /// assert_eq!(Address::new(0x1009).align_down(8), Address::new(0x1008));
    /// assert_eq!(Address::new(0x1010).align_down(16), Address::new(0x1010));
    /// ```
    pub const fn align_down(self, alignment: u64) -> Self
    {
        debug_assert!(alignment.is_power_of_two());
        Address(self.0 & !(alignment - 1))
    }

    /// Convert to a raw pointer for writing into the current address space.
    pub fn as_mut_ptr<T>(self) -> *mut T
    {
        self.0 as usize as *mut T
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<usize> for Address
{
    fn from(value: usize) -> Self
    {
        Address(value as u64)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

impl BitAnd<u64> for Address
{
    type Output = u64;

    fn bitand(self, rhs: u64) -> Self::Output
    {
        self.0 & rhs
    }
}
