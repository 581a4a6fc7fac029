//! i.MX GPIO controller model: 32 lines, each usable as an interrupt source.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU32, Ordering};
use crate::base::error::{Error, Result};
use crate::base::irq::{IrqChip, IrqSubsystem, IrqType};
use crate::base::sync::SpinLock;
use crate::driver::gpio::{GpioChip, GpioDirection, GpioSubsystem};


pub const NGPIO: u32 = 32;

struct Lines {
    /// `DR`/`PSR`: the level of every line.
    level: u32,
    /// `GDIR`: set bits are outputs.
    output: u32,
    /// `IMR`
    unmasked: u32,
    trigger: [IrqType; NGPIO as usize],
}

pub struct SimGpioChip {
    label: String,
    lines: SpinLock<Lines>,
    irqs: SpinLock<Weak<IrqSubsystem>>,
    irq_base: AtomicU32,
}

impl SimGpioChip {
    /// Every line starts as an input pulled up.
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: String::from(label),
            lines: SpinLock::new(Lines {
                level: u32::MAX,
                output: 0,
                unmasked: 0,
                trigger: [IrqType::NONE; NGPIO as usize],
            }),
            irqs: SpinLock::new(Weak::new()),
            irq_base: AtomicU32::new(0),
        })
    }

    /// Register the chip as a GPIO controller at `base`, and as an interrupt controller.
    pub fn attach(self: &Arc<Self>, gpio: &GpioSubsystem,
                  irqs: &Arc<IrqSubsystem>, base: u32, phandle: u32) -> Result {
        gpio.add_chip(self.clone(), base, Some(phandle))?;
        let virq = irqs.add_domain(self.clone(), NGPIO, Some(phandle));
        self.irq_base.store(virq, Ordering::Release);
        *self.irqs.lock() = Arc::downgrade(irqs);
        Ok(())
    }

    /// Current level of a line, whoever drives it.
    pub fn level(&self, offset: u32) -> bool {
        self.lines.lock().level & (1 << offset) != 0
    }

    pub fn is_output(&self, offset: u32) -> bool {
        self.lines.lock().output & (1 << offset) != 0
    }

    pub fn is_unmasked(&self, offset: u32) -> bool {
        self.lines.lock().unmasked & (1 << offset) != 0
    }

    /// Drive an input line from outside, as a key or a peripheral would. An edge or level
    /// matching the line's trigger raises its interrupt.
    pub fn set_input(&self, offset: u32, value: bool) {
        let fire = {
            let mut lines = self.lines.lock();
            let bit = 1 << offset;
            if lines.output & bit != 0 {
                warn!("{}: line {} is an output, input ignored", self.label, offset);
                return;
            }
            let old = lines.level & bit != 0;
            if value {
                lines.level |= bit;
            } else {
                lines.level &= !bit;
            }
            let ty = lines.trigger[offset as usize];
            match (old, value) {
                (false, true) => ty.intersects(IrqType::EDGE_RISING | IrqType::LEVEL_HIGH),
                (true, false) => ty.intersects(IrqType::EDGE_FALLING | IrqType::LEVEL_LOW),
                _ => false,
            }
        };
        if fire {
            self.raise(offset);
        }
    }

    /// A falling then rising edge, the way an interrupt output pulses.
    pub fn pulse_low(&self, offset: u32) {
        self.set_input(offset, false);
        self.set_input(offset, true);
    }

    fn raise(&self, offset: u32) {
        let Some(irqs) = self.irqs.lock().upgrade() else { return };
        let virq = self.irq_base.load(Ordering::Acquire) + offset;
        if let Err(e) = irqs.generic_handle_irq(virq) {
            debug!("{}: irq {} not delivered: {:?}", self.label, virq, e);
        }
    }
}

impl GpioChip for SimGpioChip {
    fn label(&self) -> &str {
        &self.label
    }

    fn ngpio(&self) -> u32 {
        NGPIO
    }

    fn direction_input(&self, offset: u32) -> Result {
        self.lines.lock().output &= !(1 << offset);
        Ok(())
    }

    fn direction_output(&self, offset: u32, value: bool) -> Result {
        self.lines.lock().output |= 1 << offset;
        self.set_value(offset, value);
        Ok(())
    }

    fn get_direction(&self, offset: u32) -> GpioDirection {
        if self.is_output(offset) { GpioDirection::Out } else { GpioDirection::In }
    }

    fn get_value(&self, offset: u32) -> Result<bool> {
        Ok(self.level(offset))
    }

    /// Only outputs latch a new level, writing an input line is a no-op like on `DR`.
    fn set_value(&self, offset: u32, value: bool) {
        let mut lines = self.lines.lock();
        let bit = 1 << offset;
        if lines.output & bit == 0 {
            return;
        }
        if value {
            lines.level |= bit;
        } else {
            lines.level &= !bit;
        }
    }

    fn to_irq(&self, offset: u32) -> Result<u32> {
        match self.irq_base.load(Ordering::Acquire) {
            0 => Err(Error::ENXIO),
            base => Ok(base + offset),
        }
    }
}

impl IrqChip for SimGpioChip {
    fn name(&self) -> &str {
        &self.label
    }

    fn irq_set_type(&self, hwirq: u32, ty: IrqType) -> Result {
        if hwirq >= NGPIO {
            return Err(Error::EINVAL);
        }
        self.lines.lock().trigger[hwirq as usize] = ty & IrqType::SENSE_MASK;
        Ok(())
    }

    fn irq_mask(&self, hwirq: u32) {
        self.lines.lock().unmasked &= !(1 << hwirq);
    }

    fn irq_unmask(&self, hwirq: u32) {
        self.lines.lock().unmasked |= 1 << hwirq;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;
    use crate::base::irq::{IrqFlags, IrqHandler, IrqReturn};

    #[derive(Default)]
    struct Count(AtomicUsize);

    impl IrqHandler for Count {
        fn handle_irq(&self, _irq: u32) -> IrqReturn {
            self.0.fetch_add(1, Ordering::SeqCst);
            IrqReturn::Handled
        }
    }

    #[test]
    fn edges_raise_irqs() {
        let gpio = GpioSubsystem::new();
        let irqs = IrqSubsystem::new();
        let chip = SimGpioChip::new("gpio1");
        chip.attach(&gpio, &irqs, 0, 1).unwrap();

        let virq = gpio.to_irq(18).unwrap();
        let count = Arc::new(Count::default());
        irqs.request_irq(virq, count.clone(), IrqFlags::TRIGGER_FALLING, "key0").unwrap();
        assert!(chip.is_unmasked(18));

        chip.set_input(18, false);
        chip.set_input(18, false);
        chip.set_input(18, true);
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
        chip.pulse_low(18);
        assert_eq!(count.0.load(Ordering::SeqCst), 2);
        assert_eq!(gpio.get_value(18), Ok(true));
    }

    #[test]
    fn outputs_ignore_input() {
        let chip = SimGpioChip::new("gpio5");
        chip.direction_output(1, false).unwrap();
        chip.set_input(1, true);
        assert!(!chip.level(1));
        // Inputs do not latch writes.
        chip.set_value(2, false);
        assert!(chip.level(2));
        assert_eq!(chip.to_irq(2), Err(Error::ENXIO));
    }
}
