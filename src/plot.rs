use std::path::Path;

use textplots::{Chart, Plot, Shape};

use crate::{
    error::Result,
    metric_log::{read_values, ACCURACY_FILE, LOSS_FILE},
};

const WIDTH: u32 = 180;
const HEIGHT: u32 = 60;
const MAX_POINTS: usize = 256;

/// A titled line chart of one metric series.
pub struct TextPlot {
    title: String,
    x_label: String,
    y_label: String,
    values: Vec<f64>,
}

impl TextPlot {
    pub fn new(title: &str, x_label: &str, y_label: &str, values: Vec<f64>) -> Self {
        Self {
            title: title.to_string(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            values,
        }
    }

    pub fn render(&self) -> String {
        let points = smooth_values(&self.values, MAX_POINTS);
        let x_max = points.last().map(|(x, _)| *x).unwrap_or(0.0).max(1.0);

        let chart = Chart::new(WIDTH, HEIGHT, 0.0, x_max)
            .lineplot(&Shape::Lines(&points))
            .to_string();

        format!(
            "{}\n{}: {}\n{chart}\n{:>width$}\n",
            self.title,
            self.y_label,
            summary(&self.values),
            self.x_label,
            width = WIDTH as usize / 2,
        )
    }
}

fn summary(values: &[f64]) -> String {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) => format!("{first:.4} → {last:.4} ({} points)", values.len()),
        _ => "no data".to_string(),
    }
}

/// Average consecutive values so that at most about `size_approx` points remain.
///
/// The x coordinate of each point is the index of the first value it averages.
fn smooth_values(values: &[f64], size_approx: usize) -> Vec<(f32, f32)> {
    let batch_size = values.len().div_ceil(size_approx.max(1)).max(1);

    values
        .chunks(batch_size)
        .enumerate()
        .map(|(i, chunk)| {
            let mean = chunk.iter().sum::<f64>() / chunk.len() as f64;
            ((i * batch_size) as f32, mean as f32)
        })
        .collect()
}

/// Read the metric logs in `directory` and build the accuracy-vs-epoch chart, then the
/// loss-vs-step chart when `loss` is set.
pub fn load_plots<P: AsRef<Path>>(directory: P, loss: bool) -> Result<Vec<TextPlot>> {
    let directory = directory.as_ref();
    let mut plots = Vec::with_capacity(2);

    let losses = if loss {
        Some(read_values(directory.join(LOSS_FILE))?)
    } else {
        None
    };
    let accuracies = read_values(directory.join(ACCURACY_FILE))?;

    plots.push(TextPlot::new(
        "Accuracy over time",
        "Epochs",
        "Accuracy",
        accuracies,
    ));

    if let Some(losses) = losses {
        plots.push(TextPlot::new("Loss over time", "Steps", "Loss", losses));
    }

    Ok(plots)
}

/// Render the metric logs in `directory` to the terminal.
pub fn plot_accuracy<P: AsRef<Path>>(directory: P, loss: bool) -> Result<()> {
    for plot in load_plots(directory, loss)? {
        println!("{}", plot.render());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric_log::MetricHistory;

    #[test]
    fn smooth_keeps_short_series() {
        let points = smooth_values(&[1.0, 2.0, 3.0], 256);

        assert_eq!(points, vec![(0.0, 1.0), (1.0, 2.0), (2.0, 3.0)]);
    }

    #[test]
    fn smooth_averages_long_series() {
        let values = (0..1000).map(|i| i as f64).collect::<Vec<_>>();

        let points = smooth_values(&values, 100);

        assert_eq!(points.len(), 100);
        assert_eq!(points[0], (0.0, 4.5));
        assert_eq!(points[99].0, 990.0);
    }

    #[test]
    fn loads_accuracy_then_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = MetricHistory::new();
        history.push_loss(2.3);
        history.push_loss(1.1);
        history.push_accuracy(0.8);
        history.save(dir.path()).unwrap();

        let plots = load_plots(dir.path(), true).unwrap();

        assert_eq!(plots.len(), 2);
        assert_eq!(plots[0].values, vec![0.0, 0.8]);
        assert_eq!(plots[1].values, vec![2.3, 1.1]);
        assert!(plots[0].render().starts_with("Accuracy over time"));
    }

    #[test]
    fn loss_file_is_optional_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ACCURACY_FILE), "0.0\n0.5\n").unwrap();

        let plots = load_plots(dir.path(), false).unwrap();

        assert_eq!(plots.len(), 1);
    }
}
