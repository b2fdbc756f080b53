use crate::performance::PerformanceError;

/// `(p1 - p0) / p0`. A zero entry price is never coerced to 0 or infinity.
pub fn simple_return(p0: f64, p1: f64) -> Result<f64, PerformanceError> {
    if p0 == 0.0 {
        return Err(PerformanceError::DivisionByZero);
    }
    Ok((p1 - p0) / p0)
}

pub fn relative_return(stock_return: f64, benchmark_return: f64) -> f64 {
    stock_return - benchmark_return
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_percent_gain_is_exact() {
        assert_eq!(simple_return(100.0, 110.0), Ok(0.10));
    }

    #[test]
    fn losses_are_negative() {
        assert_eq!(simple_return(100.0, 90.0), Ok(-0.10));
    }

    #[test]
    fn zero_entry_price_fails() {
        assert_eq!(simple_return(0.0, 100.0), Err(PerformanceError::DivisionByZero));
        assert_eq!(simple_return(-0.0, 100.0), Err(PerformanceError::DivisionByZero));
    }

    #[test]
    fn relative_return_subtracts_benchmark() {
        let r = relative_return(0.10, 0.05);
        assert!((r - 0.05).abs() < 1e-12);
    }
}
