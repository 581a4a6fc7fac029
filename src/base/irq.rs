//! Interrupt handling: irq domains, descriptors and handler registration.
//!
//! Interrupt controllers register an [`IrqChip`] with a fixed number of hwirqs and get a block
//! of virtual irq numbers back. Drivers register [`IrqHandler`]s on a virq. A controller raises
//! an interrupt with [`IrqSubsystem::generic_handle_irq`], and the threaded part of a handler
//! runs right after the primary one, with the line masked for `ONESHOT` handlers.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use crate::base::error::{Error, Result};
use crate::base::sync::SpinLock;


bitflags! {
    /// Flags of `request_irq()`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IrqFlags: u32 {
        const TRIGGER_RISING = 0x0000_0001;
        const TRIGGER_FALLING = 0x0000_0002;
        const TRIGGER_HIGH = 0x0000_0004;
        const TRIGGER_LOW = 0x0000_0008;
        const TRIGGER_MASK = Self::TRIGGER_RISING.bits() | Self::TRIGGER_FALLING.bits()
            | Self::TRIGGER_HIGH.bits() | Self::TRIGGER_LOW.bits();
        const SHARED = 0x0000_0080;
        const ONESHOT = 0x0000_2000;
        const NO_AUTOEN = 0x0008_0000;
    }
}

bitflags! {
    /// Trigger type of a line, the `IRQ_TYPE_*` values used in the DeviceTree.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IrqType: u32 {
        const EDGE_RISING = 0x1;
        const EDGE_FALLING = 0x2;
        const EDGE_BOTH = Self::EDGE_RISING.bits() | Self::EDGE_FALLING.bits();
        const LEVEL_HIGH = 0x4;
        const LEVEL_LOW = 0x8;
        const SENSE_MASK = 0xf;
    }
}

impl IrqType {
    pub const NONE: IrqType = IrqType::empty();

    #[inline]
    pub fn is_level(self) -> bool {
        self.intersects(IrqType::LEVEL_HIGH | IrqType::LEVEL_LOW)
    }
}

impl From<IrqFlags> for IrqType {
    fn from(flags: IrqFlags) -> Self {
        IrqType::from_bits_truncate((flags & IrqFlags::TRIGGER_MASK).bits())
    }
}

/// Return value of an irq handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt was not from this device or was not handled.
    None,
    /// The interrupt was handled by this device.
    Handled,
    /// The handler requests to wake the handler thread.
    WakeThread,
}

/// An irq handler.
pub trait IrqHandler: Send + Sync {
    /// Called from interrupt context when the irq happens. The default defers everything to
    /// [`thread_fn`](Self::thread_fn), like a NULL primary handler does.
    fn handle_irq(&self, _irq: u32) -> IrqReturn {
        IrqReturn::WakeThread
    }

    /// The threaded part of a handler registered with
    /// [`IrqSubsystem::request_threaded_irq`].
    fn thread_fn(&self, _irq: u32) -> IrqReturn {
        IrqReturn::None
    }
}

/// Interrupt controller operations.
pub trait IrqChip: Send + Sync {
    fn name(&self) -> &str;

    fn irq_set_type(&self, hwirq: u32, ty: IrqType) -> Result;

    fn irq_mask(&self, _hwirq: u32) {}

    fn irq_unmask(&self, _hwirq: u32) {}
}


struct IrqAction {
    handler: Arc<dyn IrqHandler>,
    flags: IrqFlags,
    name: String,
    threaded: bool,
}

struct IrqDesc {
    trigger: IrqType,
    actions: Vec<IrqAction>,
    /// Disable depth, the line is masked while it is non-zero.
    depth: u32,
    /// An interrupt arrived while the line was disabled.
    pending: bool,
    count: u64,
}

struct IrqDomain {
    chip: Arc<dyn IrqChip>,
    base: u32,
    phandle: Option<u32>,
    descs: Vec<IrqDesc>,
}

impl IrqDomain {
    #[inline]
    fn contains(&self, irq: u32) -> bool {
        irq >= self.base && irq < self.base + self.descs.len() as u32
    }
}

/// First virq handed out. Virq 0 is never valid.
pub const IRQ_BASE: u32 = 16;

pub struct IrqSubsystem {
    domains: SpinLock<Vec<IrqDomain>>,
}

#[inline]
fn handler_eq(a: &Arc<dyn IrqHandler>, b: &Arc<dyn IrqHandler>) -> bool {
    Arc::as_ptr(a) as *const u8 == Arc::as_ptr(b) as *const u8
}

impl IrqSubsystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            domains: SpinLock::new(Vec::new()),
        })
    }

    /// Register an interrupt controller with `size` hwirqs. `phandle` is the controller's DT
    /// phandle, if it is described in the DT. Returns the first virq of the domain.
    pub fn add_domain(&self, chip: Arc<dyn IrqChip>, size: u32, phandle: Option<u32>) -> u32 {
        let mut domains = self.domains.lock();
        let base = domains.last().map_or(IRQ_BASE, |d| d.base + d.descs.len() as u32);
        let descs = (0..size).map(|_| IrqDesc {
            trigger: IrqType::NONE,
            actions: Vec::new(),
            depth: 1,
            pending: false,
            count: 0,
        }).collect();
        debug!("irq domain {}: virq {}..{}", chip.name(), base, base + size);
        domains.push(IrqDomain { chip, base, phandle, descs });
        base
    }

    /// `irq_create_mapping()` for a domain identified by its controller phandle.
    pub fn find_mapping(&self, phandle: u32, hwirq: u32) -> Result<u32> {
        let domains = self.domains.lock();
        let domain = domains.iter()
            .find(|d| d.phandle == Some(phandle))
            .ok_or(Error::EPROBE_DEFER)?;
        if hwirq as usize >= domain.descs.len() {
            return Err(Error::EINVAL);
        }
        Ok(domain.base + hwirq)
    }

    fn with_desc<R>(&self, irq: u32, f: impl FnOnce(&Arc<dyn IrqChip>, u32, &mut IrqDesc) -> R)
                    -> Result<R> {
        let mut domains = self.domains.lock();
        let domain = domains.iter_mut().find(|d| d.contains(irq)).ok_or(Error::EINVAL)?;
        let hwirq = irq - domain.base;
        let chip = &domain.chip;
        Ok(f(chip, hwirq, &mut domain.descs[hwirq as usize]))
    }

    pub fn request_irq(&self, irq: u32, handler: Arc<dyn IrqHandler>, flags: IrqFlags,
                       name: &str) -> Result {
        self.setup_irq(irq, handler, flags, name, false)
    }

    pub fn request_threaded_irq(&self, irq: u32, handler: Arc<dyn IrqHandler>, flags: IrqFlags,
                                name: &str) -> Result {
        self.setup_irq(irq, handler, flags, name, true)
    }

    fn setup_irq(&self, irq: u32, handler: Arc<dyn IrqHandler>, flags: IrqFlags, name: &str,
                 threaded: bool) -> Result {
        self.with_desc(irq, |chip, hwirq, desc| {
            if let Some(old) = desc.actions.first() {
                if !(old.flags & flags).contains(IrqFlags::SHARED) {
                    error!("irq {}: flags mismatch, {} already holds it", irq, old.name);
                    return Err(Error::EBUSY);
                }
                // All the handlers on a shared line agree on the trigger.
                let ty = IrqType::from(flags);
                if !ty.is_empty() && ty != desc.trigger {
                    return Err(Error::EBUSY);
                }
            } else {
                let ty = IrqType::from(flags);
                if !ty.is_empty() {
                    chip.irq_set_type(hwirq, ty)?;
                    desc.trigger = ty;
                }
                if !flags.contains(IrqFlags::NO_AUTOEN) {
                    desc.depth = 0;
                    chip.irq_unmask(hwirq);
                }
            }
            desc.actions.push(IrqAction {
                handler,
                flags,
                name: String::from(name),
                threaded,
            });
            Ok(())
        })?
    }

    /// Remove `handler` from `irq`. The line is masked once the last handler is gone.
    pub fn free_irq(&self, irq: u32, handler: &Arc<dyn IrqHandler>) {
        let res = self.with_desc(irq, |chip, hwirq, desc| {
            let before = desc.actions.len();
            desc.actions.retain(|a| !handler_eq(&a.handler, handler));
            if desc.actions.len() == before {
                warn!("trying to free already-free irq {}", irq);
            } else if desc.actions.is_empty() {
                desc.depth = 1;
                desc.pending = false;
                chip.irq_mask(hwirq);
            }
        });
        if res.is_err() {
            warn!("trying to free invalid irq {}", irq);
        }
    }

    /// Disable the line, nesting.
    pub fn disable_irq(&self, irq: u32) -> Result {
        self.with_desc(irq, |chip, hwirq, desc| {
            if desc.depth == 0 {
                chip.irq_mask(hwirq);
            }
            desc.depth += 1;
        })
    }

    /// Undo one [`disable_irq`](Self::disable_irq). When the line gets enabled again, an
    /// interrupt that arrived meanwhile is replayed.
    pub fn enable_irq(&self, irq: u32) -> Result {
        let replay = self.with_desc(irq, |chip, hwirq, desc| {
            match desc.depth {
                0 => {
                    warn!("unbalanced enable for irq {}", irq);
                    false
                }
                1 => {
                    desc.depth = 0;
                    chip.irq_unmask(hwirq);
                    core::mem::take(&mut desc.pending)
                }
                _ => {
                    desc.depth -= 1;
                    false
                }
            }
        })?;
        if replay {
            self.generic_handle_irq(irq)?;
        }
        Ok(())
    }

    pub fn irq_get_trigger_type(&self, irq: u32) -> IrqType {
        self.with_desc(irq, |_, _, desc| desc.trigger).unwrap_or(IrqType::NONE)
    }

    /// `irq_set_irq_type()`: program the trigger type into the controller.
    pub fn set_trigger_type(&self, irq: u32, ty: IrqType) -> Result {
        self.with_desc(irq, |chip, hwirq, desc| {
            chip.irq_set_type(hwirq, ty)?;
            desc.trigger = ty;
            Ok(())
        })?
    }

    /// Number of interrupts handled on `irq`.
    pub fn irq_count(&self, irq: u32) -> u64 {
        self.with_desc(irq, |_, _, desc| desc.count).unwrap_or(0)
    }

    pub fn has_action(&self, irq: u32) -> bool {
        self.with_desc(irq, |_, _, desc| !desc.actions.is_empty()).unwrap_or(false)
    }

    /// Deliver an interrupt on `irq` to its handlers.
    pub fn generic_handle_irq(&self, irq: u32) -> Result<IrqReturn> {
        let (chip, hwirq, actions) = self.with_desc(irq, |chip, hwirq, desc| {
            if desc.actions.is_empty() {
                return Err(Error::ENODEV);
            }
            if desc.depth > 0 {
                desc.pending = true;
                return Err(Error::EAGAIN);
            }
            desc.count += 1;
            let actions: Vec<_> = desc.actions.iter()
                .map(|a| (a.handler.clone(), a.flags, a.threaded))
                .collect();
            Ok((chip.clone(), hwirq, actions))
        })??;

        let mut ret = IrqReturn::None;
        for (handler, flags, threaded) in actions {
            let mut r = handler.handle_irq(irq);
            if r == IrqReturn::WakeThread {
                if threaded {
                    let oneshot = flags.contains(IrqFlags::ONESHOT);
                    if oneshot {
                        chip.irq_mask(hwirq);
                    }
                    r = handler.thread_fn(irq);
                    if oneshot {
                        chip.irq_unmask(hwirq);
                    }
                } else {
                    warn!("irq {}: handler woke a thread that does not exist", irq);
                    r = IrqReturn::Handled;
                }
            }
            if r != IrqReturn::None {
                ret = IrqReturn::Handled;
            }
        }
        Ok(ret)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestChip {
        ty: AtomicU32,
        masked: AtomicUsize,
    }

    impl IrqChip for TestChip {
        fn name(&self) -> &str {
            "test-intc"
        }

        fn irq_set_type(&self, _hwirq: u32, ty: IrqType) -> Result {
            if ty.contains(IrqType::LEVEL_HIGH | IrqType::LEVEL_LOW) {
                return Err(Error::EINVAL);
            }
            self.ty.store(ty.bits(), Ordering::SeqCst);
            Ok(())
        }

        fn irq_mask(&self, _hwirq: u32) {
            self.masked.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Counter {
        primary: AtomicUsize,
        thread: AtomicUsize,
        defer: bool,
    }

    impl IrqHandler for Counter {
        fn handle_irq(&self, _irq: u32) -> IrqReturn {
            self.primary.fetch_add(1, Ordering::SeqCst);
            if self.defer { IrqReturn::WakeThread } else { IrqReturn::Handled }
        }

        fn thread_fn(&self, _irq: u32) -> IrqReturn {
            self.thread.fetch_add(1, Ordering::SeqCst);
            IrqReturn::Handled
        }
    }

    fn setup() -> (Arc<IrqSubsystem>, Arc<TestChip>, u32) {
        let irqs = IrqSubsystem::new();
        let chip = Arc::new(TestChip::default());
        let base = irqs.add_domain(chip.clone(), 32, Some(1));
        (irqs, chip, base)
    }

    #[test]
    fn domains_get_consecutive_virqs() {
        let (irqs, chip, base) = setup();
        assert_eq!(base, IRQ_BASE);
        assert_eq!(irqs.add_domain(chip, 8, Some(2)), IRQ_BASE + 32);
        assert_eq!(irqs.find_mapping(2, 3), Ok(IRQ_BASE + 35));
        assert_eq!(irqs.find_mapping(2, 8), Err(Error::EINVAL));
        assert_eq!(irqs.find_mapping(9, 0), Err(Error::EPROBE_DEFER));
    }

    #[test]
    fn request_programs_trigger_and_dispatches() {
        let (irqs, chip, base) = setup();
        let h = Arc::new(Counter::default());
        irqs.request_irq(base + 4, h.clone(), IrqFlags::TRIGGER_FALLING, "key0").unwrap();
        assert_eq!(chip.ty.load(Ordering::SeqCst), IrqType::EDGE_FALLING.bits());
        assert_eq!(irqs.irq_get_trigger_type(base + 4), IrqType::EDGE_FALLING);
        assert_eq!(irqs.generic_handle_irq(base + 4), Ok(IrqReturn::Handled));
        assert_eq!(h.primary.load(Ordering::SeqCst), 1);
        assert_eq!(irqs.irq_count(base + 4), 1);
    }

    #[test]
    fn second_request_needs_shared() {
        let (irqs, _chip, base) = setup();
        let a: Arc<dyn IrqHandler> = Arc::new(Counter::default());
        let b: Arc<dyn IrqHandler> = Arc::new(Counter::default());
        irqs.request_irq(base, a.clone(), IrqFlags::empty(), "a").unwrap();
        assert_eq!(irqs.request_irq(base, b.clone(), IrqFlags::SHARED, "b"), Err(Error::EBUSY));
        irqs.free_irq(base, &a);
        irqs.request_irq(base, a.clone(), IrqFlags::SHARED, "a").unwrap();
        irqs.request_irq(base, b, IrqFlags::SHARED, "b").unwrap();
        assert_eq!(irqs.request_irq(9999, a, IrqFlags::empty(), "x"), Err(Error::EINVAL));
    }

    #[test]
    fn threaded_oneshot_masks_line() {
        let (irqs, chip, base) = setup();
        let h = Arc::new(Counter { defer: true, ..Default::default() });
        irqs.request_threaded_irq(base + 1, h.clone(), IrqFlags::ONESHOT, "ts").unwrap();
        let masked = chip.masked.load(Ordering::SeqCst);
        irqs.generic_handle_irq(base + 1).unwrap();
        assert_eq!(h.thread.load(Ordering::SeqCst), 1);
        assert_eq!(chip.masked.load(Ordering::SeqCst), masked + 1);
    }

    #[test]
    fn disabled_line_replays_on_enable() {
        let (irqs, _chip, base) = setup();
        let h = Arc::new(Counter::default());
        irqs.request_irq(base + 2, h.clone(), IrqFlags::empty(), "k").unwrap();
        irqs.disable_irq(base + 2).unwrap();
        irqs.disable_irq(base + 2).unwrap();
        assert!(irqs.generic_handle_irq(base + 2).is_err());
        irqs.enable_irq(base + 2).unwrap();
        assert_eq!(h.primary.load(Ordering::SeqCst), 0);
        irqs.enable_irq(base + 2).unwrap();
        assert_eq!(h.primary.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unhandled_line_reports_nodev() {
        let (irqs, _chip, base) = setup();
        assert_eq!(irqs.generic_handle_irq(base + 3), Err(Error::ENODEV));
    }
}
