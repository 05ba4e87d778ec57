//! Runs a whole batch against an emulated device: npy files in, framed
//! bytes over a link, reply lines back, a scored and saved report out.

use motorbench::{
    batch::{run_batch, select_indices, BatchConfig, BatchReport, Diagnoser},
    compare::compare_files,
    dataset::TestSet,
    diagnosis::{Diagnosis, Label},
    npy::NpyArray,
    spectrogram::Spectrogram,
    transport::{exchange, DeviceLink, TransportConfig, TransportError},
    wire::{Normalization, END_BYTE, START_BYTE},
};
use rand::{rngs::StdRng, SeedableRng};
use std::{collections::VecDeque, fs, io, time::Duration};

/// Answers each frame by the mean of its payload, the way a badly trained
/// classifier might. Replies arrive a few bytes at a time after a banner.
#[derive(Default)]
struct EmulatedDevice {
    frame: Vec<u8>,
    outbox: VecDeque<u8>,
    frames: Vec<Vec<u8>>,
    reject_frame: Option<usize>,
}

impl EmulatedDevice {
    fn answer(&mut self) {
        let payload = &self.frame[1..self.frame.len() - 1];
        let mean = payload.iter().map(|&b| b as f64).sum::<f64>() / payload.len() as f64;
        let reply = if Some(self.frames.len()) == self.reject_frame {
            "Received 16 bytes\r\nInvalid STFT data received!\r\n".to_owned()
        } else if mean > 127.0 {
            "Received 16 bytes\r\nDIAGNOSIS: FAULT (confidence: 0.91)\r\n".to_owned()
        } else {
            "Received 16 bytes\r\nRESULT: HEALTHY,0.80\r\n".to_owned()
        };
        self.outbox.extend(reply.bytes());
        self.frames.push(std::mem::take(&mut self.frame));
    }
}

impl DeviceLink for EmulatedDevice {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        for &b in buf {
            if b == START_BYTE {
                self.frame.clear();
            }
            self.frame.push(b);
            if b == END_BYTE && self.frame.first() == Some(&START_BYTE) {
                self.answer();
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.outbox.len().min(buf.len()).min(5);
        for slot in buf.iter_mut().take(n) {
            *slot = self.outbox.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

struct LinkDiagnoser {
    device: EmulatedDevice,
    config: TransportConfig,
    normalization: Normalization,
}

impl Diagnoser for LinkDiagnoser {
    fn diagnose(&mut self, sample: &Spectrogram) -> Result<Diagnosis, TransportError> {
        exchange(
            &mut self.device,
            sample,
            self.normalization,
            &self.config,
            |_, _| {},
        )
    }
}

fn write_testset(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    // 4 healthy samples that are quiet and 4 fault samples that are loud,
    // except sample 7 which is a quiet fault the device will miss
    let labels = [0, 0, 0, 0, 1, 1, 1, 1];
    let mut data = Vec::new();
    for (i, &label) in labels.iter().enumerate() {
        let level = if label == 1 && i != 7 { 0.9 } else { 0.1 };
        data.extend(std::iter::repeat(level).take(16));
    }

    let features = dir.join("X_test_stft.npy");
    let label_path = dir.join("y_test.npy");
    NpyArray {
        shape: vec![8, 4, 4],
        data,
    }
    .to_path(&features)
    .unwrap();
    NpyArray {
        shape: vec![8],
        data: labels.iter().map(|&l| l as f64).collect(),
    }
    .to_path(&label_path)
    .unwrap();
    (features, label_path)
}

fn diagnoser(reject_frame: Option<usize>) -> LinkDiagnoser {
    LinkDiagnoser {
        device: EmulatedDevice {
            reject_frame,
            ..Default::default()
        },
        config: TransportConfig {
            chunk_delay: Duration::ZERO,
            reply_timeout: Duration::from_millis(200),
            ..Default::default()
        },
        normalization: Normalization::Calibrated { min: 0.0, max: 1.0 },
    }
}

#[test]
fn full_test_set() {
    let dir = tempfile::tempdir().unwrap();
    let (features, labels) = write_testset(dir.path());
    let testset = TestSet::load(&features, &labels).unwrap();

    let indices = select_indices(&testset, None, &mut StdRng::seed_from_u64(0));
    assert_eq!(indices, (0..8).collect::<Vec<_>>());

    let mut device = diagnoser(Some(2));
    let config = BatchConfig {
        pause: Duration::ZERO,
    };
    let report = run_batch(&testset, &indices, &mut device, &config).unwrap();

    // every frame is start byte, 16 payload bytes, end byte
    assert_eq!(device.device.frames.len(), 8);
    assert!(device.device.frames.iter().all(|f| f.len() == 18));
    assert_eq!(device.device.frames[0][1], 25);
    assert_eq!(device.device.frames[4][1], 229);

    // sample 2 was rejected by the device and is not scored
    assert_eq!(report.total_samples, 8);
    assert_eq!(report.failed_samples, 1);
    assert_eq!(report.successful_predictions, 7);
    assert_eq!(report.confusion_matrix.counts, [[3, 0], [1, 3]]);
    assert!((report.accuracy - 6.0 / 7.0).abs() < 1e-12);
    assert_eq!(report.y_true[3], Label::Fault);
    assert!(report.classification_report.contains("weighted avg"));

    let results = dir.path().join("mcu_testset_results.ron");
    report.save(&results).unwrap();
    assert_eq!(BatchReport::load(&results).unwrap(), report);

    let reference = dir.path().join("cross_validation_results.ron");
    fs::write(&reference, "(test_accuracy: 0.88)").unwrap();
    let comparison = compare_files(&reference, &results).unwrap();
    assert!(comparison.is_close());
}

#[test]
fn balanced_subset_over_the_link() {
    let dir = tempfile::tempdir().unwrap();
    let (features, labels) = write_testset(dir.path());
    let testset = TestSet::load(&features, &labels).unwrap();

    let indices = select_indices(&testset, Some(4), &mut StdRng::seed_from_u64(42));
    assert_eq!(indices.len(), 4);
    let healthy = indices
        .iter()
        .filter(|&&i| testset.label(i) == Some(Label::Healthy))
        .count();
    assert_eq!(healthy, 2);

    let mut device = diagnoser(None);
    let report = run_batch(
        &testset,
        &indices,
        &mut device,
        &BatchConfig {
            pause: Duration::ZERO,
        },
    )
    .unwrap();
    assert_eq!(report.total_samples, 4);
    assert_eq!(report.failed_samples, 0);
    assert_eq!(report.confusion_matrix.total(), 4);
}
