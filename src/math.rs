use std::f64::consts::PI;

const LANCZOS_G: f64 = 7.;
const LANCZOS_COEF: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// `ln(1 + exp(x))` without overflow for large `x`.
#[inline]
pub(crate) fn log1pexp(x: f64) -> f64 {
    if x > 0. {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

#[inline]
pub(crate) fn logistic(x: f64) -> f64 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}

#[inline]
pub(crate) fn logit(p: f64) -> f64 {
    p.ln() - (-p).ln_1p()
}

/// Log of the gamma function (Lanczos approximation, g = 7).
pub(crate) fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // reflection formula
        (PI / (PI * x).sin()).abs().ln() - ln_gamma(1. - x)
    } else {
        let x = x - 1.;
        let t = x + LANCZOS_G + 0.5;
        let a = LANCZOS_COEF
            .iter()
            .enumerate()
            .skip(1)
            .fold(LANCZOS_COEF[0], |acc, (i, &c)| acc + c / (x + i as f64));
        0.5 * (2. * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
    }
}

pub(crate) fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn check_logit_inverts_logistic(x in -15f64..15f64) {
            let p = logistic(x);
            prop_assert!((logit(p) - x).abs() < 1e-6);
        }

        #[test]
        fn check_log1pexp(x in -30f64..30f64) {
            let naive = x.exp().ln_1p();
            prop_assert!((log1pexp(x) - naive).abs() < 1e-10);
        }
    }

    #[test]
    fn check_ln_gamma() {
        assert_abs_diff_eq!(ln_gamma(1.), 0., epsilon = 1e-10);
        assert_abs_diff_eq!(ln_gamma(2.), 0., epsilon = 1e-10);
        assert_abs_diff_eq!(ln_gamma(5.), 24f64.ln(), epsilon = 1e-10);
        assert_abs_diff_eq!(ln_gamma(0.5), PI.sqrt().ln(), epsilon = 1e-10);
        assert_abs_diff_eq!(ln_gamma(0.1), 2.252_712_651_734_206, epsilon = 1e-9);
    }

    #[test]
    fn check_large_log1pexp() {
        assert_eq!(log1pexp(1000.), 1000.);
        assert_eq!(log1pexp(-1000.), 0.);
    }
}
