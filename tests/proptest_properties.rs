use aad_core::{exp, fabs, log, max, min, normal_cdf, normal_dens, pow, sqrt, tape, Number};
use proptest::prelude::*;

fn reset() {
    tape::clear();
    tape::set_num_results_for_aad(false, 1);
}

/// A nonzero `f64` of either sign, for division's right-hand side.
fn nonzero() -> impl Strategy<Value = f64> {
    (0.001f64..1000.0, any::<bool>()).prop_map(|(mag, neg)| if neg { -mag } else { mag })
}

proptest! {
    #[test]
    fn value_correctness_add(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
        reset();
        let x = Number::from(a);
        let y = Number::from(b);
        let z = x + y;
        prop_assert_eq!(z.value(), a + b);
    }

    #[test]
    fn value_correctness_sub(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
        reset();
        let x = Number::from(a);
        let y = Number::from(b);
        let z = x - y;
        prop_assert_eq!(z.value(), a - b);
    }

    #[test]
    fn value_correctness_mul(a in -1.0e3f64..1.0e3, b in -1.0e3f64..1.0e3) {
        reset();
        let x = Number::from(a);
        let y = Number::from(b);
        let z = x * y;
        prop_assert_eq!(z.value(), a * b);
    }

    #[test]
    fn value_correctness_div(a in -1.0e3f64..1.0e3, b in nonzero()) {
        reset();
        let x = Number::from(a);
        let y = Number::from(b);
        let z = x / y;
        prop_assert_eq!(z.value(), a / b);
    }

    #[test]
    fn value_correctness_neg(a in -1.0e6f64..1.0e6) {
        reset();
        let x = Number::from(a);
        let z = -x;
        prop_assert_eq!(z.value(), -a);
    }

    #[test]
    fn value_correctness_pow(a in 0.001f64..100.0, b in -5.0f64..5.0) {
        reset();
        let x = Number::from(a);
        let y = Number::from(b);
        let z = pow(x, y);
        prop_assert_eq!(z.value(), a.powf(b));
    }

    #[test]
    fn value_correctness_exp(a in -50.0f64..50.0) {
        reset();
        let x = Number::from(a);
        let z = exp(x);
        prop_assert_eq!(z.value(), a.exp());
    }

    #[test]
    fn value_correctness_log(a in 0.0001f64..1.0e6) {
        reset();
        let x = Number::from(a);
        let z = log(x);
        prop_assert_eq!(z.value(), a.ln());
    }

    #[test]
    fn value_correctness_sqrt(a in 0.0f64..1.0e6) {
        reset();
        let x = Number::from(a);
        let z = sqrt(x);
        prop_assert_eq!(z.value(), a.sqrt());
    }

    #[test]
    fn value_correctness_fabs(a in -1.0e6f64..1.0e6) {
        reset();
        let x = Number::from(a);
        let z = fabs(x);
        prop_assert_eq!(z.value(), a.abs());
    }

    #[test]
    fn value_correctness_max_min(a in -1.0e3f64..1.0e3, b in -1.0e3f64..1.0e3) {
        reset();
        let x = Number::from(a);
        let y = Number::from(b);
        prop_assert_eq!(max(x, y).value(), a.max(b));
        prop_assert_eq!(min(x, y).value(), a.min(b));
    }

    #[test]
    fn value_correctness_normal_cdf_and_dens(a in -8.0f64..8.0) {
        reset();
        let x = Number::from(a);
        prop_assert_eq!(normal_dens(x).value(), 0.398_942_280_401_432_7 * (-0.5 * a * a).exp());
        let cdf = normal_cdf(x).value();
        prop_assert!(cdf >= 0.0 && cdf <= 1.0);
    }

    #[test]
    fn gradient_matches_finite_difference_pow_exp_log_sqrt(a in 0.5f64..20.0) {
        reset();
        let x = Number::from(a);
        let out = pow(x, Number::from(2.0)) + exp(x) * 0.01 + log(x) + sqrt(x);
        out.propagate_to_start();
        let dx = x.adjoint();

        let h = 1e-5;
        let f = |a: f64| a.powf(2.0) + a.exp() * 0.01 + a.ln() + a.sqrt();
        let fd = (f(a + h) - f(a - h)) / (2.0 * h);

        prop_assert!((dx - fd).abs() < 1e-2 * (1.0 + fd.abs()));
    }

    #[test]
    fn gradient_matches_finite_difference(a in -10.0f64..10.0, b in -10.0f64..10.0) {
        reset();
        let x = Number::from(a);
        let y = Number::from(b);
        let out = x * x * y + y * y;
        out.propagate_to_start();
        let dx = x.adjoint();
        let dy = y.adjoint();

        let h = 1e-5;
        let f = |a: f64, b: f64| a * a * b + b * b;
        let fd_dx = (f(a + h, b) - f(a - h, b)) / (2.0 * h);
        let fd_dy = (f(a, b + h) - f(a, b - h)) / (2.0 * h);

        prop_assert!((dx - fd_dx).abs() < 1e-2 * (1.0 + fd_dx.abs()));
        prop_assert!((dy - fd_dy).abs() < 1e-2 * (1.0 + fd_dy.abs()));
    }

    #[test]
    fn linearity_of_adjoints(a in -10.0f64..10.0, alpha in -5.0f64..5.0) {
        reset();
        let x = Number::from(a);
        let y = x * x * x;
        y.seed_adjoint(1.0);
        let idx = y.try_tape_index().unwrap();
        tape::propagate_adjoints(idx, 0);
        let base = x.adjoint();

        reset();
        let x2 = Number::from(a);
        let y2 = x2 * x2 * x2;
        y2.seed_adjoint(alpha);
        let idx2 = y2.try_tape_index().unwrap();
        tape::propagate_adjoints(idx2, 0);
        let scaled = x2.adjoint();

        prop_assert!((scaled - alpha * base).abs() < 1e-6 * (1.0 + base.abs() * alpha.abs()));
    }

    #[test]
    fn rewind_idempotence(n in 1usize..200) {
        reset();
        for i in 0..n {
            Number::from(i as f64);
        }
        tape::mark();
        for i in 0..n {
            Number::from(i as f64);
        }
        let len_at_peak = tape::tape_len();
        tape::rewind_to_mark();
        let len_at_mark = tape::tape_len();
        prop_assert_eq!(len_at_mark, n);
        for i in 0..n {
            Number::from(i as f64);
        }
        prop_assert_eq!(tape::tape_len(), len_at_peak);
    }
}
