// flags.rs -- Shipgate envelope flag bits (spec.md §4.4, §6).

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShipgateFlags: u16 {
        const NO_DEFLATE = 0x0001;
        const NO_ENCRYPT = 0x0002;
        const RESPONSE   = 0x0004;
        const FAILURE    = 0x0008;
    }
}

bitflags::bitflags! {
    /// Capability bits a ship announces about itself in its roster record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShipCapFlags: u32 {
        const IS_GC  = 0x0000_0001;
        const IS_PC  = 0x0000_0002;
        const IS_EP3 = 0x0000_0004;
    }
}
