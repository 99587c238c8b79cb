use lesion_core::labels::ClassLabels;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Per-class precision, recall and F1 with accuracy and macro/weighted
/// averages. Undefined ratios (zero denominator) are reported as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
    pub total: usize,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ClassificationReport {
    /// `targets` and `predictions` hold class indices into `labels`.
    pub fn new(labels: &ClassLabels, targets: &[usize], predictions: &[usize]) -> Self {
        let num_classes = labels.len();
        let mut true_positives = vec![0usize; num_classes];
        let mut predicted = vec![0usize; num_classes];
        let mut support = vec![0usize; num_classes];

        for (&target, &prediction) in targets.iter().zip(predictions) {
            if let Some(count) = support.get_mut(target) {
                *count += 1;
            }
            if let Some(count) = predicted.get_mut(prediction) {
                *count += 1;
            }
            if target == prediction && target < num_classes {
                true_positives[target] += 1;
            }
        }

        let classes: Vec<ClassMetrics> = labels
            .iter()
            .enumerate()
            .map(|(index, label)| {
                let precision = ratio(true_positives[index], predicted[index]);
                let recall = ratio(true_positives[index], support[index]);
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                ClassMetrics {
                    label: label.to_string(),
                    precision,
                    recall,
                    f1,
                    support: support[index],
                }
            })
            .collect();

        let total = targets.len().min(predictions.len());
        let correct: usize = true_positives.iter().sum();

        Self {
            macro_avg: average(&classes, |_| 1.0),
            weighted_avg: average(&classes, |class| class.support as f64),
            accuracy: ratio(correct, total),
            classes,
            total,
        }
    }
}

fn average(classes: &[ClassMetrics], weight: impl Fn(&ClassMetrics) -> f64) -> AverageMetrics {
    let total_weight: f64 = classes.iter().map(&weight).sum();
    if total_weight == 0.0 {
        return AverageMetrics {
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
        };
    }

    let weighted = |metric: fn(&ClassMetrics) -> f64| {
        classes
            .iter()
            .map(|class| metric(class) * weight(class))
            .sum::<f64>()
            / total_weight
    };

    AverageMetrics {
        precision: weighted(|class| class.precision),
        recall: weighted(|class| class.recall),
        f1: weighted(|class| class.f1),
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|class| class.label.len())
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or_default();

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for class in &self.classes {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                class.label, class.precision, class.recall, class.f1, class.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, self.total
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_per_class_metrics() {
        let labels: ClassLabels = ["bcc", "mel", "nv"].into_iter().collect();
        let targets = [0, 0, 1, 1, 2, 2];
        let predictions = [0, 1, 1, 1, 2, 0];

        let report = ClassificationReport::new(&labels, &targets, &predictions);

        let bcc = &report.classes[0];
        assert!(approx(bcc.precision, 0.5));
        assert!(approx(bcc.recall, 0.5));
        assert!(approx(bcc.f1, 0.5));
        let mel = &report.classes[1];
        assert!(approx(mel.precision, 2.0 / 3.0));
        assert!(approx(mel.recall, 1.0));
        assert!(approx(mel.f1, 0.8));
        let nv = &report.classes[2];
        assert!(approx(nv.precision, 1.0));
        assert!(approx(nv.recall, 0.5));
        assert_eq!(nv.support, 2);

        assert!(approx(report.accuracy, 4.0 / 6.0));
        assert!(approx(report.macro_avg.recall, (0.5 + 1.0 + 0.5) / 3.0));
        assert_eq!(report.total, 6);
    }

    #[test]
    fn test_weighted_average_uses_support() {
        let labels: ClassLabels = ["a", "b"].into_iter().collect();
        let report = ClassificationReport::new(&labels, &[0, 0, 0, 1], &[0, 0, 0, 0]);

        assert!(approx(report.classes[1].precision, 0.0));
        assert!(approx(report.classes[1].f1, 0.0));
        assert!(approx(report.weighted_avg.recall, 0.75));
        assert!(approx(report.macro_avg.recall, 0.5));
    }

    #[test]
    fn test_display_lists_every_class() {
        let labels: ClassLabels = ["akiec", "vasc"].into_iter().collect();
        let report = ClassificationReport::new(&labels, &[0, 1], &[0, 1]);
        let rendered = report.to_string();

        assert!(rendered.contains("akiec"));
        assert!(rendered.contains("vasc"));
        assert!(rendered.contains("weighted avg"));
        assert!(rendered.contains("1.00"));
    }
}
