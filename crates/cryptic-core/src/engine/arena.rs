use super::error::EngineError;
use super::payload::StructurePayload;
use slotmap::{SlotMap, new_key_type};
use tracing::trace;

new_key_type! {
    /// Handle to a buffer resident in a [`DeviceArena`].
    pub struct BufferId;
}

/// Dense row-major `rows x width` matrix of per-residue values.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    rows: usize,
    width: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn zeros(rows: usize, width: usize) -> Self {
        Self {
            rows,
            width,
            data: vec![0.0; rows * width],
        }
    }

    /// Returns `None` when `data.len() != rows * width`.
    pub fn from_vec(rows: usize, width: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == rows * width).then_some(Self { rows, width, data })
    }

    pub fn from_rows<R: AsRef<[f32]>>(width: usize, rows: &[R]) -> Option<Self> {
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            if row.as_ref().len() != width {
                return None;
            }
            data.extend_from_slice(row.as_ref());
        }
        Some(Self {
            rows: rows.len(),
            width,
            data,
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.width..(index + 1) * self.width]
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn iter_rows(&self) -> impl DoubleEndedIterator<Item = &[f32]> + ExactSizeIterator {
        self.data.chunks_exact(self.width.max(1)).take(self.rows)
    }

    /// Position of the first non-finite entry as `(row, column)`.
    pub fn first_non_finite(&self) -> Option<(usize, usize)> {
        self.data
            .iter()
            .position(|v| !v.is_finite())
            .map(|i| (i / self.width.max(1), i % self.width.max(1)))
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

enum Resident<'p> {
    Structure(&'p StructurePayload),
    Matrix(FeatureMatrix),
}

impl Resident<'_> {
    fn byte_len(&self) -> usize {
        match self {
            Resident::Structure(payload) => payload.packed_bytes(),
            Resident::Matrix(matrix) => matrix.byte_len(),
        }
    }
}

/// Host/device transfer counters of one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub uploads: usize,
    pub downloads: usize,
}

/// Buffers of one in-flight structure.
///
/// Stages exchange [`BufferId`] handles; data only crosses the host boundary
/// through [`upload`](Self::upload) and [`download`](Self::download). Every
/// buffer is released when the arena is dropped, whether or not the pipeline
/// finished.
pub struct DeviceArena<'p> {
    label: String,
    buffers: SlotMap<BufferId, Resident<'p>>,
    budget_bytes: usize,
    used_bytes: usize,
    peak_bytes: usize,
    transfers: TransferStats,
}

impl<'p> DeviceArena<'p> {
    pub fn new(label: &str, budget_bytes: usize) -> Self {
        Self {
            label: label.to_string(),
            buffers: SlotMap::with_key(),
            budget_bytes,
            used_bytes: 0,
            peak_bytes: 0,
            transfers: TransferStats::default(),
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn reserve(&mut self, stage: &'static str, bytes: usize) -> Result<(), EngineError> {
        let requested = self.used_bytes + bytes;
        if requested > self.budget_bytes {
            return Err(EngineError::device(
                &self.label,
                stage,
                format!(
                    "allocation of {bytes} bytes exceeds the memory budget ({} of {} bytes in use)",
                    self.used_bytes, self.budget_bytes
                ),
            ));
        }
        self.used_bytes = requested;
        self.peak_bytes = self.peak_bytes.max(requested);
        Ok(())
    }

    fn insert(&mut self, stage: &'static str, resident: Resident<'p>) -> Result<BufferId, EngineError> {
        self.reserve(stage, resident.byte_len())?;
        let id = self.buffers.insert(resident);
        trace!(arena = %self.label, stage, used = self.used_bytes, "Buffer allocated.");
        Ok(id)
    }

    /// Host-to-device transfer of a structure.
    pub fn upload(&mut self, payload: &'p StructurePayload) -> Result<BufferId, EngineError> {
        let id = self.insert("upload", Resident::Structure(payload))?;
        self.transfers.uploads += 1;
        Ok(id)
    }

    /// Places a stage output in the arena without a host round trip.
    pub fn store(&mut self, stage: &'static str, matrix: FeatureMatrix) -> Result<BufferId, EngineError> {
        self.insert(stage, Resident::Matrix(matrix))
    }

    pub fn structure(&self, id: BufferId, stage: &'static str) -> Result<&'p StructurePayload, EngineError> {
        match self.buffers.get(id) {
            Some(Resident::Structure(payload)) => Ok(*payload),
            Some(Resident::Matrix(_)) => Err(EngineError::integrity(
                &self.label,
                stage,
                "expected a structure buffer, found a feature matrix",
            )),
            None => Err(EngineError::integrity(
                &self.label,
                stage,
                "structure buffer is no longer resident",
            )),
        }
    }

    pub fn matrix(&self, id: BufferId, stage: &'static str) -> Result<&FeatureMatrix, EngineError> {
        match self.buffers.get(id) {
            Some(Resident::Matrix(matrix)) => Ok(matrix),
            Some(Resident::Structure(_)) => Err(EngineError::integrity(
                &self.label,
                stage,
                "expected a feature matrix, found a structure buffer",
            )),
            None => Err(EngineError::integrity(
                &self.label,
                stage,
                "feature buffer is no longer resident",
            )),
        }
    }

    /// Releases a buffer; freeing an unknown handle is a no-op.
    pub fn free(&mut self, id: BufferId) {
        if let Some(resident) = self.buffers.remove(id) {
            self.used_bytes -= resident.byte_len();
        }
    }

    /// Device-to-host transfer of a result matrix; the buffer leaves the arena.
    pub fn download(&mut self, id: BufferId, stage: &'static str) -> Result<FeatureMatrix, EngineError> {
        self.matrix(id, stage)?;
        let Some(Resident::Matrix(matrix)) = self.buffers.remove(id) else {
            return Err(EngineError::integrity(
                &self.label,
                stage,
                "result buffer is no longer resident",
            ));
        };
        self.used_bytes -= matrix.byte_len();
        self.transfers.downloads += 1;
        Ok(matrix)
    }

    #[inline]
    pub fn transfers(&self) -> TransferStats {
        self.transfers
    }

    #[inline]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    #[inline]
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }
}

impl Drop for DeviceArena<'_> {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            trace!(
                arena = %self.label,
                buffers = self.buffers.len(),
                bytes = self.used_bytes,
                "Releasing resident buffers."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ErrorKind;
    use crate::test_support::lattice_batch;

    fn payload() -> StructurePayload {
        StructurePayload::from_batch(lattice_batch("arena", 6, 36, 0))
    }

    #[test]
    fn feature_matrix_checks_shape() {
        assert!(FeatureMatrix::from_vec(2, 3, vec![0.0; 6]).is_some());
        assert!(FeatureMatrix::from_vec(2, 3, vec![0.0; 5]).is_none());
        let m = FeatureMatrix::from_rows(2, &[[1.0, 2.0], [3.0, f32::NAN]]).unwrap();
        assert_eq!(m.row(1)[0], 3.0);
        assert_eq!(m.first_non_finite(), Some((1, 1)));
        assert_eq!(m.iter_rows().len(), 2);
        assert_eq!(m.iter_rows().rev().next().map(|r| r[0]), Some(3.0));
    }

    #[test]
    fn upload_store_download_counts_transfers_once_each() {
        let payload = payload();
        let mut arena = DeviceArena::new("arena", usize::MAX);
        let s = arena.upload(&payload).unwrap();
        let a = arena.store("mask", FeatureMatrix::zeros(6, 1)).unwrap();
        let b = arena.store("fusion", FeatureMatrix::zeros(6, 136)).unwrap();
        arena.free(a);
        assert_eq!(arena.structure(s, "test").unwrap().id(), "arena");
        let out = arena.download(b, "test").unwrap();
        assert_eq!(out.width(), 136);
        assert_eq!(
            arena.transfers(),
            TransferStats {
                uploads: 1,
                downloads: 1
            }
        );
        assert_eq!(arena.live_buffers(), 1);
        assert_eq!(arena.used_bytes(), payload.packed_bytes());
        assert!(arena.peak_bytes() > arena.used_bytes());
    }

    #[test]
    fn exceeding_budget_is_a_device_error() {
        let mut arena = DeviceArena::new("tight", 100);
        let err = arena.store("fusion", FeatureMatrix::zeros(10, 10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Device);
        assert_eq!(arena.used_bytes(), 0);
    }

    #[test]
    fn stale_or_mistyped_handles_are_integrity_errors() {
        let payload = payload();
        let mut arena = DeviceArena::new("arena", usize::MAX);
        let s = arena.upload(&payload).unwrap();
        let m = arena.store("mask", FeatureMatrix::zeros(6, 1)).unwrap();
        assert_eq!(arena.matrix(s, "t").unwrap_err().kind(), ErrorKind::Integrity);
        assert_eq!(arena.structure(m, "t").unwrap_err().kind(), ErrorKind::Integrity);
        arena.free(m);
        assert_eq!(arena.matrix(m, "t").unwrap_err().kind(), ErrorKind::Integrity);
        assert_eq!(arena.download(s, "t").unwrap_err().kind(), ErrorKind::Integrity);
        assert_eq!(arena.transfers().downloads, 0);
    }
}
