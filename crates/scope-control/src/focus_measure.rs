//! Focus measures for contrast autofocus.

use crate::imaging::GrayImage;
use scope_core::types::FocusOperator;

/// Score `image` with `operator`. Higher is sharper.
pub fn focus_score(operator: FocusOperator, image: &GrayImage) -> f64 {
    match operator {
        FocusOperator::LaplacianEnergy => laplacian_energy(image),
        FocusOperator::GrayLevelVariance => gray_level_std_dev(image),
        FocusOperator::Brenner => brenner(image),
    }
}

/// Mean squared response of the 4-neighbour Laplacian over interior pixels.
pub fn laplacian_energy(image: &GrayImage) -> f64 {
    let (w, h) = (image.width, image.height);
    if w < 3 || h < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = image.at(x - 1, y) + image.at(x + 1, y) + image.at(x, y - 1)
                + image.at(x, y + 1)
                - 4.0 * image.at(x, y);
            sum += lap * lap;
        }
    }
    sum / ((w - 2) * (h - 2)) as f64
}

/// Standard deviation of intensities. The gray-level variance operator
/// scores with this rather than the variance so the stop threshold compares
/// linear contrast.
pub fn gray_level_std_dev(image: &GrayImage) -> f64 {
    let n = image.data.len();
    if n == 0 {
        return 0.0;
    }
    let mean = image.data.iter().sum::<f64>() / n as f64;
    let var = image.data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    var.sqrt()
}

/// Mean squared horizontal difference at a two-pixel offset.
pub fn brenner(image: &GrayImage) -> f64 {
    let (w, h) = (image.width, image.height);
    if w < 3 || h == 0 {
        return 0.0;
    }
    let mut sum = 0.0;
    for y in 0..h {
        for x in 0..w - 2 {
            let d = image.at(x + 2, y) - image.at(x, y);
            sum += d * d;
        }
    }
    sum / ((w - 2) * h) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(size: usize, amplitude: f64) -> GrayImage {
        let data = (0..size * size)
            .map(|i| {
                let (x, y) = (i % size, i / size);
                100.0 + if (x / 2 + y / 2) % 2 == 0 { amplitude } else { -amplitude }
            })
            .collect();
        GrayImage::new(size, size, data)
    }

    #[test]
    fn flat_image_scores_zero() {
        let flat = GrayImage::new(8, 8, vec![42.0; 64]);
        for op in [
            FocusOperator::LaplacianEnergy,
            FocusOperator::GrayLevelVariance,
            FocusOperator::Brenner,
        ] {
            assert_eq!(focus_score(op, &flat), 0.0);
        }
    }

    #[test]
    fn sharper_scores_higher() {
        let sharp = checker(16, 50.0);
        let soft = checker(16, 10.0);
        for op in [
            FocusOperator::LaplacianEnergy,
            FocusOperator::GrayLevelVariance,
            FocusOperator::Brenner,
        ] {
            assert!(focus_score(op, &sharp) > focus_score(op, &soft), "{op:?}");
        }
    }

    #[test]
    fn gray_level_operator_scores_the_standard_deviation() {
        // variance 4, standard deviation 2
        let img = GrayImage::new(2, 1, vec![0.0, 4.0]);
        assert!((gray_level_std_dev(&img) - 2.0).abs() < 1e-12);
        assert_eq!(
            focus_score(FocusOperator::GrayLevelVariance, &img),
            gray_level_std_dev(&img)
        );
    }
}
