//! Input report as the application hands it to the class

/// One HID input report
///
/// A non-zero `report_id` is sent as the first byte on the wire, ahead of
/// `data`; report id 0 means the interface does not use report ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HidReport {
    pub report_id: u8,
    pub data: Vec<u8>,
}

impl HidReport {
    pub fn new(report_id: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            report_id,
            data: data.into(),
        }
    }

    /// Report on an interface without report ids
    pub fn unnumbered(data: impl Into<Vec<u8>>) -> Self {
        Self::new(0, data)
    }

    /// Bytes the report occupies on the wire
    pub fn wire_len(&self) -> usize {
        self.data.len() + usize::from(self.report_id != 0)
    }

    /// Write the wire form into `buf`, returning the length written
    ///
    /// `buf` must hold at least [`HidReport::wire_len`] bytes.
    pub(crate) fn write_wire(&self, buf: &mut [u8]) -> usize {
        if self.report_id == 0 {
            buf[..self.data.len()].copy_from_slice(&self.data);
        } else {
            buf[0] = self.report_id;
            buf[1..=self.data.len()].copy_from_slice(&self.data);
        }
        self.wire_len()
    }
}
