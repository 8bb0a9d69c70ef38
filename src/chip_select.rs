use embedded_hal::digital::v2::OutputPin;

use crate::error::Fault;

pub(crate) struct ChipSelect<Pin>
    where Pin: OutputPin,
{
    pin: Pin,
}

impl<Pin> ChipSelect<Pin>
    where Pin: OutputPin,
{
    /// Construct a new CS pin controller and set it high (unselected)
    pub(crate) fn new(mut pin: Pin) -> Self {
        pin.set_high().unwrap_or(());
        Self {
            pin
        }
    }

    /// Asserts chip select until the returned guard is dropped.
    pub(crate) fn select(&mut self) -> Result<Selected<'_, Pin>, Fault> {
        Selected::new(self)
    }

    /// Forces the line high outside of any transaction (used around reset).
    pub(crate) fn release(&mut self) -> Result<(), Fault> {
        self.pin.set_high().map_err(|_| Fault::Pin)
    }
}

pub(crate) struct Selected<'pin, Pin>
    where Pin: OutputPin,
{
    cs: &'pin mut ChipSelect<Pin>,
}

impl<'pin, Pin> Selected<'pin, Pin>
    where Pin: OutputPin,
{
    fn new(cs: &'pin mut ChipSelect<Pin>) -> Result<Self, Fault> {
        cs.pin.set_low().map_err(|_| Fault::Pin)?;
        Ok(Self {
            cs
        })
    }
}

impl<Pin> Drop for Selected<'_, Pin>
    where Pin: OutputPin,
{
    fn drop(&mut self) {
        self.cs.pin.set_high().unwrap_or(());
    }
}
