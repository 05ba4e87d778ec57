//! Scoring for binary Healthy/Fault predictions.

use crate::diagnosis::Label;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

/// Counts of true class (rows) against predicted class (columns), both in
/// [Label::index] order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// `counts[true][predicted]`
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    /// Tally paired true and predicted labels. Extra entries in the longer
    /// slice are ignored.
    pub fn from_labels(y_true: &[Label], y_pred: &[Label]) -> Self {
        let mut counts = [[0; 2]; 2];
        for (t, p) in y_true.iter().zip(y_pred) {
            counts[t.index()][p.index()] += 1;
        }
        ConfusionMatrix { counts }
    }

    /// Number of pairs with this truth and prediction.
    pub fn get(&self, truth: Label, predicted: Label) -> usize {
        self.counts[truth.index()][predicted.index()]
    }

    /// Number of scored pairs.
    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Number of pairs on the diagonal.
    pub fn correct(&self) -> usize {
        Label::ALL.iter().map(|&l| self.get(l, l)).sum()
    }

    /// Fraction of pairs on the diagonal, 0 when empty.
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// Pairs whose truth is `label`.
    pub fn support(&self, label: Label) -> usize {
        self.counts[label.index()].iter().sum()
    }

    /// Pairs predicted as `label`.
    pub fn predicted(&self, label: Label) -> usize {
        self.counts.iter().map(|row| row[label.index()]).sum()
    }

    /// Precision, recall, F1 and support for one class.
    pub fn class_scores(&self, label: Label) -> ClassScores {
        let hits = self.get(label, label);
        let precision = ratio(hits, self.predicted(label));
        let recall = ratio(hits, self.support(label));
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassScores {
            precision,
            recall,
            f1,
            support: self.support(label),
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Scores for a single class, or an average over classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    #[allow(missing_docs)]
    pub precision: f64,
    #[allow(missing_docs)]
    pub recall: f64,
    #[allow(missing_docs)]
    pub f1: f64,
    /// number of true samples of the class
    pub support: usize,
}

/// Per-class scores plus accuracy and the two usual averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// In [Label::ALL] order.
    pub classes: [ClassScores; 2],
    #[allow(missing_docs)]
    pub accuracy: f64,
    /// unweighted mean over classes
    pub macro_avg: ClassScores,
    /// mean over classes weighted by support
    pub weighted_avg: ClassScores,
}

impl ClassificationReport {
    /// Compute every score from a confusion matrix.
    pub fn from_matrix(cm: &ConfusionMatrix) -> Self {
        let classes = Label::ALL.map(|l| cm.class_scores(l));
        let total = cm.total();

        let average = |weight: &dyn Fn(&ClassScores) -> f64| {
            let norm: f64 = classes.iter().map(weight).sum();
            let mean = |field: fn(&ClassScores) -> f64| {
                if norm == 0.0 {
                    0.0
                } else {
                    classes.iter().map(|c| field(c) * weight(c)).sum::<f64>() / norm
                }
            };
            ClassScores {
                precision: mean(|c| c.precision),
                recall: mean(|c| c.recall),
                f1: mean(|c| c.f1),
                support: total,
            }
        };

        ClassificationReport {
            classes,
            accuracy: cm.accuracy(),
            macro_avg: average(&|_| 1.0),
            weighted_avg: average(&|c| c.support as f64),
        }
    }

    /// Scores of one class.
    pub fn class(&self, label: Label) -> &ClassScores {
        &self.classes[label.index()]
    }
}

impl fmt::Display for ClassificationReport {
    /// A fixed-width table with two decimals, as scikit-learn prints it.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAME_WIDTH: usize = 12;
        let total = self.macro_avg.support;
        let mut out = String::new();

        writeln!(
            out,
            "{:>w$}  {:>9} {:>9} {:>9} {:>9}\n",
            "",
            "precision",
            "recall",
            "f1-score",
            "support",
            w = NAME_WIDTH
        )?;

        let row = |out: &mut String, name: &str, s: &ClassScores| {
            writeln!(
                out,
                "{:>w$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name,
                s.precision,
                s.recall,
                s.f1,
                s.support,
                w = NAME_WIDTH
            )
        };

        for label in Label::ALL {
            row(&mut out, label.name(), self.class(label))?;
        }
        writeln!(out)?;
        writeln!(
            out,
            "{:>w$}  {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy",
            "",
            "",
            self.accuracy,
            total,
            w = NAME_WIDTH
        )?;
        row(&mut out, "macro avg", &self.macro_avg)?;
        row(&mut out, "weighted avg", &self.weighted_avg)?;

        write!(f, "{}", out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Label::{Fault as F, Healthy as H};

    #[test]
    fn three_of_four() {
        let cm = ConfusionMatrix::from_labels(&[H, F, H, F], &[H, F, F, F]);
        assert_eq!(cm.counts, [[1, 1], [0, 2]]);
        assert_eq!(cm.accuracy(), 0.75);

        let report = ClassificationReport::from_matrix(&cm);
        let healthy = report.class(H);
        assert_eq!(healthy.precision, 1.0);
        assert_eq!(healthy.recall, 0.5);
        assert!((healthy.f1 - 2.0 / 3.0).abs() < 1e-12);

        let fault = report.class(F);
        assert!((fault.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(fault.recall, 1.0);
        assert!((fault.f1 - 0.8).abs() < 1e-12);

        assert!((report.macro_avg.recall - 0.75).abs() < 1e-12);
        assert_eq!(report.weighted_avg.support, 4);
    }

    #[test]
    fn missing_class_scores_zero() {
        let cm = ConfusionMatrix::from_labels(&[F, F], &[F, F]);
        let report = ClassificationReport::from_matrix(&cm);
        assert_eq!(report.class(H), &ClassScores::default());
        assert_eq!(report.accuracy, 1.0);
        // weighted by support, the empty class does not count
        assert_eq!(report.weighted_avg.f1, 1.0);
        assert_eq!(report.macro_avg.f1, 0.5);
    }

    #[test]
    fn empty_matrix() {
        let cm = ConfusionMatrix::default();
        assert_eq!(cm.accuracy(), 0.0);
        let report = ClassificationReport::from_matrix(&cm);
        assert_eq!(report.weighted_avg.precision, 0.0);
    }

    #[test]
    fn renders_table() {
        let cm = ConfusionMatrix::from_labels(&[H, F, H, F], &[H, F, F, F]);
        let text = ClassificationReport::from_matrix(&cm).to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "              precision    recall  f1-score   support"
        );
        assert_eq!(lines[1], "");
        assert_eq!(
            lines[2],
            "     Healthy       1.00      0.50      0.67         2"
        );
        assert_eq!(
            lines[3],
            "       Fault       0.67      1.00      0.80         2"
        );
        assert_eq!(
            lines[5],
            "    accuracy                           0.75         4"
        );
        assert_eq!(
            lines[7],
            "weighted avg       0.83      0.75      0.73         4"
        );
    }
}
