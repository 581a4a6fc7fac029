//! SPI bus core: devices, transfers and the host controller seam.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use crate::base::error::{Error, Result};
use crate::base::irq::IrqSubsystem;
use crate::driver::of::{self, DeviceNode, DeviceTree};


bitflags! {
    /// Clock polarity/phase and wiring options of a device.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SpiMode: u32 {
        /// Clock phase.
        const CPHA = 0x01;
        /// Clock polarity.
        const CPOL = 0x02;
        const CS_HIGH = 0x04;
        const LSB_FIRST = 0x08;
        /// SI/SO signals shared.
        const THREE_WIRE = 0x10;
        const LOOP = 0x20;
        const NO_CS = 0x40;
        const READY = 0x80;
    }
}

impl SpiMode {
    pub const MODE_0: SpiMode = SpiMode::empty();
    pub const MODE_1: SpiMode = SpiMode::CPHA;
    pub const MODE_2: SpiMode = SpiMode::CPOL;
    pub const MODE_3: SpiMode = SpiMode::CPOL.union(SpiMode::CPHA);

    /// Mode number 0..=3 from the CPOL/CPHA bits.
    #[inline]
    pub fn number(self) -> u32 {
        (self & SpiMode::MODE_3).bits()
    }
}

/// A read/write buffer pair. Either side may be absent, a full-duplex transfer has both of
/// the same length.
#[derive(Debug, Default)]
pub struct SpiTransfer<'a> {
    pub tx_buf: Option<&'a [u8]>,
    pub rx_buf: Option<&'a mut [u8]>,
    /// 0 means the device default.
    pub speed_hz: u32,
    pub bits_per_word: u8,
    pub delay_us: u16,
}

impl<'a> SpiTransfer<'a> {
    pub fn tx(buf: &'a [u8]) -> Self {
        Self { tx_buf: Some(buf), ..Default::default() }
    }

    pub fn rx(buf: &'a mut [u8]) -> Self {
        Self { rx_buf: Some(buf), ..Default::default() }
    }

    /// Bytes clocked by this transfer.
    pub fn len(&self) -> usize {
        let tx = self.tx_buf.map_or(0, |b| b.len());
        let rx = self.rx_buf.as_ref().map_or(0, |b| b.len());
        tx.max(rx)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An SPI host controller.
pub trait SpiMaster: Send + Sync {
    fn name(&self) -> &str;

    fn num_chipselect(&self) -> u16;

    /// Run all transfers of one message with the chip select of `dev` asserted. Returns the
    /// number of bytes transferred.
    fn transfer_one_message(&self, dev: &SpiDevice, xfers: &mut [SpiTransfer]) -> Result<usize>;

    /// Validate the mode of a new device.
    fn setup(&self, _dev: &SpiDevice) -> Result {
        Ok(())
    }
}

/// A device on an SPI bus.
pub struct SpiDevice {
    modalias: String,
    chip_select: u16,
    mode: SpiMode,
    max_speed_hz: u32,
    bits_per_word: u8,
    master: Arc<dyn SpiMaster>,
    irq: Option<u32>,
    of_node: Option<Arc<DeviceNode>>,
}

impl SpiDevice {
    pub fn new(modalias: &str, master: Arc<dyn SpiMaster>, chip_select: u16, mode: SpiMode,
               max_speed_hz: u32) -> Self {
        Self {
            modalias: String::from(modalias),
            chip_select,
            mode,
            max_speed_hz,
            bits_per_word: 8,
            master,
            irq: None,
            of_node: None,
        }
    }

    /// `of_register_spi_device()`: a device for the DT child `node` of a controller.
    pub fn from_of_node(tree: &DeviceTree, irqs: &IrqSubsystem, master: Arc<dyn SpiMaster>,
                        node: &Arc<DeviceNode>) -> Result<Self> {
        let cs = node.property_read_u32("reg").map_err(|e| {
            error!("{}: {} has no valid 'reg' property", master.name(), node.full_path());
            e
        })?;
        if cs >= master.num_chipselect() as u32 {
            error!("{}: cs{} >= max {}", master.name(), cs, master.num_chipselect());
            return Err(Error::EINVAL);
        }
        let mut mode = SpiMode::empty();
        for (prop, bit) in [("spi-cpha", SpiMode::CPHA), ("spi-cpol", SpiMode::CPOL),
                            ("spi-cs-high", SpiMode::CS_HIGH), ("spi-3wire", SpiMode::THREE_WIRE),
                            ("spi-lsb-first", SpiMode::LSB_FIRST)] {
            if node.property_read_bool(prop) {
                mode |= bit;
            }
        }
        let max_speed_hz = node.property_read_u32("spi-max-frequency").unwrap_or(0);
        let compat = node.property_read_string("compatible")?;
        let modalias = compat.split_once(',').map_or(compat, |(_, n)| n);

        let mut spi = Self::new(modalias, master.clone(), cs as u16, mode, max_speed_hz);
        spi.irq = of::irq::irq_of_parse_and_map(tree, irqs, node, 0).ok();
        spi.of_node = Some(node.clone());
        master.setup(&spi)?;
        Ok(spi)
    }

    #[inline]
    pub fn modalias(&self) -> &str {
        &self.modalias
    }

    #[inline]
    pub fn chip_select(&self) -> u16 {
        self.chip_select
    }

    #[inline]
    pub fn mode(&self) -> SpiMode {
        self.mode
    }

    #[inline]
    pub fn max_speed_hz(&self) -> u32 {
        self.max_speed_hz
    }

    #[inline]
    pub fn bits_per_word(&self) -> u8 {
        self.bits_per_word
    }

    #[inline]
    pub fn irq(&self) -> Option<u32> {
        self.irq
    }

    #[inline]
    pub fn of_node(&self) -> Option<&Arc<DeviceNode>> {
        self.of_node.as_ref()
    }

    #[inline]
    pub fn master(&self) -> &Arc<dyn SpiMaster> {
        &self.master
    }

    /// `spi_setup()`: change the mode and word size, checked by the controller.
    pub fn setup(&mut self, mode: SpiMode, bits_per_word: u8) -> Result {
        if bits_per_word == 0 || bits_per_word > 32 {
            return Err(Error::EINVAL);
        }
        let (old_mode, old_bits) = (self.mode, self.bits_per_word);
        self.mode = mode;
        self.bits_per_word = bits_per_word;
        if let Err(e) = self.master.setup(self) {
            self.mode = old_mode;
            self.bits_per_word = old_bits;
            return Err(e);
        }
        Ok(())
    }

    /// `spi_sync()`: fill in per-transfer defaults and run the message.
    pub fn sync(&self, xfers: &mut [SpiTransfer]) -> Result<usize> {
        for x in xfers.iter_mut() {
            if let (Some(tx), Some(rx)) = (x.tx_buf, x.rx_buf.as_ref()) {
                if tx.len() != rx.len() {
                    return Err(Error::EINVAL);
                }
            }
            if x.speed_hz == 0 || (self.max_speed_hz != 0 && x.speed_hz > self.max_speed_hz) {
                x.speed_hz = self.max_speed_hz;
            }
            if x.bits_per_word == 0 {
                x.bits_per_word = self.bits_per_word;
            }
        }
        self.master.transfer_one_message(self, xfers)
    }

    #[inline]
    pub fn write(&self, buf: &[u8]) -> Result {
        self.sync(&mut [SpiTransfer::tx(buf)]).map(|_| ())
    }

    #[inline]
    pub fn read(&self, buf: &mut [u8]) -> Result {
        self.sync(&mut [SpiTransfer::rx(buf)]).map(|_| ())
    }

    /// `spi_write_then_read()`: one message, `tx` and then `rx`, chip select held in between.
    pub fn write_then_read(&self, tx: &[u8], rx: &mut [u8]) -> Result {
        let mut xfers: Vec<SpiTransfer> = Vec::with_capacity(2);
        if !tx.is_empty() {
            xfers.push(SpiTransfer::tx(tx));
        }
        if !rx.is_empty() {
            xfers.push(SpiTransfer::rx(rx));
        }
        self.sync(&mut xfers).map(|_| ())
    }
}

impl core::fmt::Debug for SpiDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpiDevice")
            .field("modalias", &self.modalias)
            .field("master", &self.master.name())
            .field("chip_select", &self.chip_select)
            .field("mode", &self.mode.number())
            .field("max_speed_hz", &self.max_speed_hz)
            .field("bits_per_word", &self.bits_per_word)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::sync::SpinLock;
    use crate::driver::of::builder::NodeBuilder;
    use crate::driver::of::fdt::unflatten;

    /// Loopback controller: rx reads back the bytes of the previous tx, with the speed of
    /// each transfer recorded.
    #[derive(Default)]
    struct LoopMaster {
        speeds: SpinLock<Vec<u32>>,
    }

    impl SpiMaster for LoopMaster {
        fn name(&self) -> &str {
            "spi-loop"
        }

        fn num_chipselect(&self) -> u16 {
            2
        }

        fn transfer_one_message(&self, _dev: &SpiDevice, xfers: &mut [SpiTransfer])
                                -> Result<usize> {
            let mut last: Vec<u8> = Vec::new();
            let mut total = 0;
            for x in xfers.iter_mut() {
                self.speeds.lock().push(x.speed_hz);
                if let Some(rx) = x.rx_buf.as_deref_mut() {
                    for (i, b) in rx.iter_mut().enumerate() {
                        *b = last.get(i).copied().unwrap_or(0xff);
                    }
                }
                if let Some(tx) = x.tx_buf {
                    last = tx.to_vec();
                }
                total += x.len();
            }
            Ok(total)
        }

        fn setup(&self, dev: &SpiDevice) -> Result {
            if dev.mode().contains(SpiMode::THREE_WIRE) { Err(Error::EINVAL) } else { Ok(()) }
        }
    }

    #[test]
    fn device_from_dt() {
        let blob = NodeBuilder::root()
            .child(NodeBuilder::new("ecspi")
                .prop_u32("#address-cells", 1)
                .prop_u32("#size-cells", 0)
                .child(NodeBuilder::new("icm20608@0")
                    .prop_str("compatible", "alpha,icm20608")
                    .prop_u32("reg", 0)
                    .prop_u32("spi-max-frequency", 8_000_000)
                    .prop_empty("spi-cpha")
                    .prop_empty("spi-cpol"))
                .child(NodeBuilder::new("bad@5")
                    .prop_str("compatible", "x,bad")
                    .prop_u32("reg", 5)))
            .build();
        let tree = unflatten(&blob).unwrap();
        let irqs = IrqSubsystem::new();
        let master: Arc<dyn SpiMaster> = Arc::new(LoopMaster::default());

        let node = tree.find_node_by_path("/ecspi/icm20608@0").unwrap();
        let spi = SpiDevice::from_of_node(&tree, &irqs, master.clone(), &node).unwrap();
        assert_eq!(spi.modalias(), "icm20608");
        assert_eq!(spi.mode(), SpiMode::MODE_3);
        assert_eq!(spi.max_speed_hz(), 8_000_000);
        assert_eq!(spi.irq(), None);

        let bad = tree.find_node_by_path("/ecspi/bad@5").unwrap();
        assert_eq!(SpiDevice::from_of_node(&tree, &irqs, master, &bad).err(), Some(Error::EINVAL));
    }

    #[test]
    fn write_then_read_is_one_message() {
        let master = Arc::new(LoopMaster::default());
        let spi = SpiDevice::new("t", master.clone(), 0, SpiMode::MODE_0, 1_000_000);
        let mut rx = [0u8; 3];
        spi.write_then_read(&[0xf5, 0x01], &mut rx).unwrap();
        assert_eq!(rx, [0xf5, 0x01, 0xff]);
        assert_eq!(master.speeds.lock().as_slice(), &[1_000_000, 1_000_000]);

        let mut x = [SpiTransfer { tx_buf: Some(&[1, 2]), rx_buf: Some(&mut rx), ..Default::default() }];
        assert_eq!(spi.sync(&mut x), Err(Error::EINVAL));
    }

    #[test]
    fn setup_rolls_back() {
        let master = Arc::new(LoopMaster::default());
        let mut spi = SpiDevice::new("t", master, 0, SpiMode::MODE_0, 0);
        assert_eq!(spi.setup(SpiMode::THREE_WIRE, 8), Err(Error::EINVAL));
        assert_eq!(spi.mode(), SpiMode::MODE_0);
        spi.setup(SpiMode::MODE_2, 16).unwrap();
        assert_eq!(spi.bits_per_word(), 16);
        assert_eq!(spi.mode().number(), 2);
    }
}
