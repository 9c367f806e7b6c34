use serde::{Deserialize, Serialize};

/// Training loss, applied elementwise to (prediction, target) pairs. With
/// Q-update targets only the taken action's coordinate differs from the
/// prediction, so every other coordinate contributes zero loss and zero
/// gradient.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, Debug)]
pub enum Loss {
    Mse,
    Huber { delta: f64 },
}

impl Loss {
    /// The standard Huber loss with δ = 1.
    pub fn huber() -> Self {
        Loss::Huber { delta: 1.0 }
    }

    pub fn value(&self, prediction: f64, target: f64) -> f64 {
        let err = prediction - target;
        match self {
            Loss::Mse => 0.5 * err * err,
            Loss::Huber { delta } => {
                if err.abs() <= *delta {
                    0.5 * err * err
                } else {
                    delta * (err.abs() - 0.5 * delta)
                }
            }
        }
    }

    /// d loss / d prediction.
    pub fn derivative(&self, prediction: f64, target: f64) -> f64 {
        let err = prediction - target;
        match self {
            Loss::Mse => err,
            Loss::Huber { delta } => err.clamp(-*delta, *delta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_error_means_zero_loss_and_gradient() {
        for loss in [Loss::Mse, Loss::huber()] {
            assert_eq!(loss.value(1.5, 1.5), 0.0);
            assert_eq!(loss.derivative(1.5, 1.5), 0.0);
        }
    }

    #[test]
    fn huber_is_quadratic_inside_delta_linear_outside() {
        let huber = Loss::huber();
        assert_eq!(huber.value(0.5, 0.0), 0.125);
        assert_eq!(huber.value(3.0, 0.0), 2.5);
        assert_eq!(huber.derivative(0.5, 0.0), 0.5);
        assert_eq!(huber.derivative(3.0, 0.0), 1.0);
        assert_eq!(huber.derivative(-3.0, 0.0), -1.0);
    }

    #[test]
    fn mse_gradient_is_unbounded() {
        assert_eq!(Loss::Mse.derivative(10.0, 0.0), 10.0);
    }
}
