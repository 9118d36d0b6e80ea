//! Engine-driven outputs and the role tag.

use core::fmt;

use crate::port::Capability;

/// Lines the engine drives through the transceiver.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputKind {
    DriveVbus,
    LocalConnect,
    LocalSof,
}

impl OutputKind {
    pub const ALL: [OutputKind; 3] = [
        OutputKind::DriveVbus,
        OutputKind::LocalConnect,
        OutputKind::LocalSof,
    ];

    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            OutputKind::DriveVbus => 0,
            OutputKind::LocalConnect => 1,
            OutputKind::LocalSof => 2,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OutputKind::DriveVbus => "drv_vbus",
            OutputKind::LocalConnect => "loc_conn",
            OutputKind::LocalSof => "loc_sof",
        }
    }

    #[must_use]
    pub const fn capability(self) -> Capability {
        match self {
            OutputKind::DriveVbus => Capability::DriveVbus,
            OutputKind::LocalConnect => Capability::LocalConnect,
            OutputKind::LocalSof => Capability::LocalSof,
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Last value successfully applied to each output.
///
/// The latch only moves after the transceiver accepted the new level, which
/// keeps each output either fully applied or untouched.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct OutputLatch {
    applied: [bool; 3],
}

impl OutputLatch {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            applied: [false; 3],
        }
    }

    #[must_use]
    pub const fn get(&self, kind: OutputKind) -> bool {
        self.applied[kind.as_index()]
    }

    pub(crate) fn latch(&mut self, kind: OutputKind, on: bool) {
        self.applied[kind.as_index()] = on;
    }
}

/// Levels an engine state wants on its outputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutputLevels {
    pub drive_vbus: bool,
    pub local_connect: bool,
    pub local_sof: bool,
}

impl OutputLevels {
    pub const OFF: Self = Self::new(false, false, false);

    #[must_use]
    pub const fn new(drive_vbus: bool, local_connect: bool, local_sof: bool) -> Self {
        Self {
            drive_vbus,
            local_connect,
            local_sof,
        }
    }

    /// Levels paired with their kind in application order.
    #[must_use]
    pub const fn ordered(self) -> [(OutputKind, bool); 3] {
        [
            (OutputKind::DriveVbus, self.drive_vbus),
            (OutputKind::LocalConnect, self.local_connect),
            (OutputKind::LocalSof, self.local_sof),
        ]
    }
}

/// Which controller stack currently owns the port.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    #[default]
    Undefined,
    Host,
    Gadget,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Undefined => "undefined",
            Protocol::Host => "host",
            Protocol::Gadget => "gadget",
        })
    }
}
