//! # Fault records
//!
//! Platform-neutral description of a synchronous CPU fault.
//!
//! The codes are the Windows structured-exception `NTSTATUS` values, since
//! that is the only delivery mechanism this crate targets. They are defined
//! here rather than taken from `winapi` so the dispatcher and its tests
//! build on every host.
//!
//! See: [EXCEPTION_RECORD](https://learn.microsoft.com/en-us/windows/win32/api/winnt/ns-winnt-exception_record)

use std::fmt;

use crate::types::Address;

/// Structured-exception code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultCode(pub u32);

impl FaultCode
{
    pub const ACCESS_VIOLATION: Self = FaultCode(0xC000_0005);
    pub const ARRAY_BOUNDS_EXCEEDED: Self = FaultCode(0xC000_008C);
    pub const BREAKPOINT: Self = FaultCode(0x8000_0003);
    pub const DATATYPE_MISALIGNMENT: Self = FaultCode(0x8000_0002);
    pub const FLT_DENORMAL_OPERAND: Self = FaultCode(0xC000_008D);
    pub const FLT_DIVIDE_BY_ZERO: Self = FaultCode(0xC000_008E);
    pub const FLT_INEXACT_RESULT: Self = FaultCode(0xC000_008F);
    pub const FLT_INVALID_OPERATION: Self = FaultCode(0xC000_0090);
    pub const FLT_OVERFLOW: Self = FaultCode(0xC000_0091);
    pub const FLT_STACK_CHECK: Self = FaultCode(0xC000_0092);
    pub const FLT_UNDERFLOW: Self = FaultCode(0xC000_0093);
    pub const ILLEGAL_INSTRUCTION: Self = FaultCode(0xC000_001D);
    pub const IN_PAGE_ERROR: Self = FaultCode(0xC000_0006);
    pub const INT_DIVIDE_BY_ZERO: Self = FaultCode(0xC000_0094);
    pub const INT_OVERFLOW: Self = FaultCode(0xC000_0095);
    pub const INVALID_DISPOSITION: Self = FaultCode(0xC000_0026);
    pub const NONCONTINUABLE_EXCEPTION: Self = FaultCode(0xC000_0025);
    pub const PRIV_INSTRUCTION: Self = FaultCode(0xC000_0096);
    pub const SINGLE_STEP: Self = FaultCode(0x8000_0004);
    pub const STACK_OVERFLOW: Self = FaultCode(0xC000_00FD);

    /// Every code with a name, in report order.
    pub const KNOWN: [FaultCode; 20] = [
        Self::ACCESS_VIOLATION,
        Self::ARRAY_BOUNDS_EXCEEDED,
        Self::BREAKPOINT,
        Self::DATATYPE_MISALIGNMENT,
        Self::FLT_DENORMAL_OPERAND,
        Self::FLT_DIVIDE_BY_ZERO,
        Self::FLT_INEXACT_RESULT,
        Self::FLT_INVALID_OPERATION,
        Self::FLT_OVERFLOW,
        Self::FLT_STACK_CHECK,
        Self::FLT_UNDERFLOW,
        Self::ILLEGAL_INSTRUCTION,
        Self::IN_PAGE_ERROR,
        Self::INT_DIVIDE_BY_ZERO,
        Self::INT_OVERFLOW,
        Self::INVALID_DISPOSITION,
        Self::NONCONTINUABLE_EXCEPTION,
        Self::PRIV_INSTRUCTION,
        Self::SINGLE_STEP,
        Self::STACK_OVERFLOW,
    ];

    /// Raw code value.
    pub const fn raw(self) -> u32
    {
        self.0
    }

    /// `EXCEPTION_*` name of the code, or `"UNKNOWN"`.
    pub const fn name(self) -> &'static str
    {
        match self.0 {
            0xC000_0005 => "EXCEPTION_ACCESS_VIOLATION",
            0xC000_008C => "EXCEPTION_ARRAY_BOUNDS_EXCEEDED",
            0x8000_0003 => "EXCEPTION_BREAKPOINT",
            0x8000_0002 => "EXCEPTION_DATATYPE_MISALIGNMENT",
            0xC000_008D => "EXCEPTION_FLT_DENORMAL_OPERAND",
            0xC000_008E => "EXCEPTION_FLT_DIVIDE_BY_ZERO",
            0xC000_008F => "EXCEPTION_FLT_INEXACT_RESULT",
            0xC000_0090 => "EXCEPTION_FLT_INVALID_OPERATION",
            0xC000_0091 => "EXCEPTION_FLT_OVERFLOW",
            0xC000_0092 => "EXCEPTION_FLT_STACK_CHECK",
            0xC000_0093 => "EXCEPTION_FLT_UNDERFLOW",
            0xC000_001D => "EXCEPTION_ILLEGAL_INSTRUCTION",
            0xC000_0006 => "EXCEPTION_IN_PAGE_ERROR",
            0xC000_0094 => "EXCEPTION_INT_DIVIDE_BY_ZERO",
            0xC000_0095 => "EXCEPTION_INT_OVERFLOW",
            0xC000_0026 => "EXCEPTION_INVALID_DISPOSITION",
            0xC000_0025 => "EXCEPTION_NONCONTINUABLE_EXCEPTION",
            0xC000_0096 => "EXCEPTION_PRIV_INSTRUCTION",
            0x8000_0004 => "EXCEPTION_SINGLE_STEP",
            0xC000_00FD => "EXCEPTION_STACK_OVERFLOW",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for FaultCode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

impl From<u32> for FaultCode
{
    fn from(code: u32) -> Self
    {
        FaultCode(code)
    }
}

/// Kind of memory access that faulted (`ExceptionInformation[0]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind
{
    /// 0: read
    Read,
    /// 1: write
    Write,
    /// 8: instruction fetch from a no-execute page
    Execute,
}

impl AccessKind
{
    /// Decode `ExceptionInformation[0]`.
    pub const fn from_raw(raw: usize) -> Option<Self>
    {
        match raw {
            0 => Some(AccessKind::Read),
            1 => Some(AccessKind::Write),
            8 => Some(AccessKind::Execute),
            _ => None,
        }
    }
}

/// Details of an access violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess
{
    /// Read, write or execute; `None` for undocumented values
    pub kind: Option<AccessKind>,
    /// Data address that faulted (`ExceptionInformation[1]`)
    pub address: Address,
}

/// One synchronous fault as delivered by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord
{
    /// Exception code
    pub code: FaultCode,
    /// Exception flags; non-zero for nested or non-continuable records
    pub flags: u32,
    /// Address of the faulting instruction
    pub address: Address,
    /// Access details, present for access violations
    pub access: Option<MemoryAccess>,
}

impl FaultRecord
{
    /// A plain fault with no access details.
    pub fn new(code: FaultCode, address: Address) -> Self
    {
        Self {
            code,
            flags: 0,
            address,
            access: None,
        }
    }

    /// An access violation at instruction `address` touching `data`.
    pub fn access_violation(address: Address, kind: AccessKind, data: Address) -> Self
    {
        Self {
            code: FaultCode::ACCESS_VIOLATION,
            flags: 0,
            address,
            access: Some(MemoryAccess {
                kind: Some(kind),
                address: data,
            }),
        }
    }

    /// Build from the raw `ExceptionInformation` parameters.
    ///
    /// Access details are only decoded for access violations with at least
    /// two parameters.
    pub fn from_parts(code: u32, flags: u32, address: Address, information: &[usize]) -> Self
    {
        let code = FaultCode(code);
        let access = match (code, information) {
            (FaultCode::ACCESS_VIOLATION, [kind, data, ..]) => Some(MemoryAccess {
                kind: AccessKind::from_raw(*kind),
                address: Address::from(*data),
            }),
            _ => None,
        };
        Self {
            code,
            flags,
            address,
            access,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_every_known_code_has_a_name()
    {
        for code in FaultCode::KNOWN {
            assert!(code.name().starts_with("EXCEPTION_"), "{:#x}", code.raw());
        }
        assert_eq!(FaultCode(0xE06D_7363).name(), "UNKNOWN");
    }

    #[test]
    fn test_from_parts_decodes_access_violation()
    {
        let record = FaultRecord::from_parts(0xC000_0005, 0, Address::new(0x1000), &[1, 0x2000]);
        let access = record.access.unwrap();
        assert_eq!(access.kind, Some(AccessKind::Write));
        assert_eq!(access.address, Address::new(0x2000));
    }

    #[test]
    fn test_from_parts_ignores_information_for_other_codes()
    {
        let record = FaultRecord::from_parts(0xC000_0094, 0, Address::new(0x1000), &[1, 0x2000]);
        assert!(record.access.is_none());
    }
}
