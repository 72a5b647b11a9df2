// Integration tests for wren-core
//
// These tests drive sizes, storage coercion, grad slots, grad mode and the
// backward engine through the public facade only.

use rstest::rstest;
use wren::prelude::*;
use wren::{topological_order, Element, MAX_RANK};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

fn assert_vec_approx(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(
        got.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        got.len(),
        expected.len()
    );
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            approx_eq(*g, *e, tol),
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

fn leaf(values: &[f32], dims: &[usize]) -> wren::Result<Tensor> {
    let t = Tensor::from_slice(values, Size::new(dims)?)?;
    t.set_requires_grad(true)?;
    Ok(t)
}

fn grad_f64(t: &Tensor) -> wren::Result<Vec<f64>> {
    t.grad()
        .ok_or(Error::NoGradient)?
        .to_f64_vec()
}

// Size

#[rstest]
#[case(&[7])]
#[case(&[2, 3])]
#[case(&[1, 4, 2])]
#[case(&[2, 2, 2, 2, 2, 2, 2, 2])]
fn test_size_numel_is_product(#[case] dims: &[usize]) -> wren::Result<()> {
    let size = Size::new(dims)?;
    assert_eq!(size.rank(), dims.len());
    assert_eq!(size.numel(), dims.iter().product::<usize>());
    assert_eq!(size.dims(), dims);
    Ok(())
}

#[test]
fn test_size_limits() {
    assert_eq!(Size::scalar().numel(), 1);
    assert!(matches!(
        Size::new([1; MAX_RANK + 1]),
        Err(Error::RankExceeded { .. })
    ));
    assert!(matches!(
        Size::new([3, 0]),
        Err(Error::InvalidExtent { axis: 1, .. })
    ));
    assert!(matches!(
        Size::try_from(&[-1i64][..]),
        Err(Error::InvalidExtent { .. })
    ));
}

// Storage coercion

#[rstest]
#[case(DType::F32)]
#[case(DType::I32)]
#[case(DType::Bool)]
fn test_bool_round_trip(#[case] via: DType) {
    let original = Storage::from_vec(vec![true, false, false, true]);
    let back = original.to_dtype(via).to_bool();
    assert_eq!(back, original);
}

#[rstest]
#[case(DType::F32)]
#[case(DType::I32)]
fn test_int_round_trip(#[case] via: DType) {
    let original = Storage::from_vec(vec![-3i32, 0, 42, 1 << 20]);
    assert_eq!(original.to_dtype(via).to_int(), original);
}

#[test]
fn test_fraction_truncates_through_int() -> wren::Result<()> {
    let s = Storage::from_vec(vec![3.7f32, -3.7]);
    let back = s.to_int().to_float();
    assert_eq!(back.as_slice::<f32>()?, &[3.0, -3.0]);
    // Conversions never touch the source
    assert_eq!(s.as_slice::<f32>()?, &[3.7, -3.7]);
    Ok(())
}

#[test]
fn test_element_dtypes() {
    assert_eq!(<f32 as Element>::DTYPE, DType::F32);
    assert_eq!(<i32 as Element>::DTYPE, DType::I32);
    assert_eq!(<bool as Element>::DTYPE, DType::Bool);
    assert_eq!("float32".parse::<DType>().unwrap(), DType::F32);
    assert!(matches!(
        "complex64".parse::<DType>(),
        Err(Error::UnsupportedDType(_))
    ));
}

// Grad slots

#[test]
fn test_set_grad_contract() -> wren::Result<()> {
    let t = Tensor::new(Size::new([2, 2])?, DType::F32, true)?;
    let wrong = Tensor::ones(Size::new([2, 3])?, DType::F32);
    assert!(matches!(t.set_grad(&wrong), Err(Error::ShapeMismatch { .. })));

    let g = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], Size::new([2, 2])?)?;
    t.set_grad(&g)?;
    let read = t.grad().unwrap();
    assert_eq!(read.id(), g.id());
    assert_eq!(read.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

// Backward

#[test]
fn test_scalar_leaf_backward() -> wren::Result<()> {
    init_logger();
    let y = Tensor::new(Size::scalar(), DType::F32, true)?;
    y.backward()?;
    assert_eq!(y.grad().unwrap().to_scalar_f64()?, 1.0);
    Ok(())
}

#[test]
fn test_backward_preconditions() -> wren::Result<()> {
    init_logger();
    let plain = Tensor::scalar(1.0);
    assert!(matches!(plain.backward(), Err(Error::NoGradient)));

    let v = leaf(&[1.0, 2.0, 3.0], &[3])?;
    assert!(matches!(v.backward(), Err(Error::ShapeMismatch { .. })));
    Ok(())
}

#[test]
fn test_diamond_graph() -> wren::Result<()> {
    init_logger();
    // loss = sum(x*x + 3x)  =>  d/dx = 2x + 3
    let x = leaf(&[1.0, -2.0, 0.5], &[3])?;
    let left = x.mul(&x)?;
    let right = x.affine(3.0, 0.0)?;
    let loss = left.add(&right)?.sum_all()?;

    let order = topological_order(&loss);
    assert_eq!(order.iter().filter(|t| t.id() == x.id()).count(), 1);
    assert_eq!(order.first().unwrap().id(), x.id());
    assert_eq!(order.last().unwrap().id(), loss.id());

    loss.backward()?;
    assert_vec_approx(&grad_f64(&x)?, &[5.0, -1.0, 4.0], 1e-6);
    Ok(())
}

#[test]
fn test_every_node_after_its_parents() -> wren::Result<()> {
    let a = leaf(&[1.0, 2.0], &[2])?;
    let b = leaf(&[3.0, 4.0], &[2])?;
    let c = a.mul(&b)?;
    let d = c.sub(&a)?.square()?;
    let e = d.add(&c)?.mean_all()?;

    let order = topological_order(&e);
    let pos = |t: &Tensor| order.iter().position(|n| n.id() == t.id()).unwrap();
    for node in &order {
        for parent in node.parents() {
            assert!(pos(parent) < pos(node));
        }
    }
    assert_eq!(order.len(), 7);
    Ok(())
}

#[test]
fn test_composite_gradient() -> wren::Result<()> {
    init_logger();
    // loss = mean((a*b - a)^2)
    let a = leaf(&[1.0, 2.0], &[2])?;
    let b = leaf(&[3.0, 4.0], &[2])?;
    let r = a.mul(&b)?.sub(&a)?;
    let loss = r.square()?.mean_all()?;
    loss.backward()?;

    // dL/dr = r, dr/da = b - 1, dr/db = a (mean over 2 cancels the 2 of square)
    // r = [2, 6]
    assert_vec_approx(&grad_f64(&a)?, &[4.0, 18.0], 1e-5);
    assert_vec_approx(&grad_f64(&b)?, &[2.0, 12.0], 1e-5);
    assert_vec_approx(&loss.to_f64_vec()?, &[20.0], 1e-5);
    Ok(())
}

#[test]
fn test_untracked_operand_gets_no_grad() -> wren::Result<()> {
    let w = leaf(&[2.0, 2.0], &[2])?;
    let x = Tensor::from_slice(&[1.0f32, 5.0], Size::new([2])?)?;
    w.mul(&x)?.sum_all()?.backward()?;
    assert_vec_approx(&grad_f64(&w)?, &[1.0, 5.0], 1e-6);
    assert!(x.grad().is_none());
    Ok(())
}

#[test]
fn test_seeded_backward() -> wren::Result<()> {
    let x = leaf(&[1.0, 2.0], &[2])?;
    let y = x.affine(-1.0, 4.0)?;
    let seed = Tensor::from_slice(&[10.0f32, 100.0], Size::new([2])?)?;
    y.backward_with_grad(&seed)?;
    assert_vec_approx(&grad_f64(&x)?, &[-10.0, -100.0], 1e-6);
    Ok(())
}

#[test]
fn test_gradient_descent_converges() -> wren::Result<()> {
    init_logger();
    // Minimize mean((w - target)^2) by plain gradient steps
    let target = Tensor::from_slice(&[1.0f32, -2.0, 3.0], Size::new([3])?)?;
    let w = leaf(&[0.0, 0.0, 0.0], &[3])?;
    for _ in 0..200 {
        w.zero_grad();
        w.sub(&target)?.square()?.mean_all()?.backward()?;
        let g = w.grad().unwrap();
        let step = with_no_grad(|| g.affine(-0.5, 0.0))?;
        let updated = with_no_grad(|| w.add(&step))?;
        w.update_data(updated.storage()?.clone())?;
    }
    assert_vec_approx(&w.to_f64_vec()?, &[1.0, -2.0, 3.0], 1e-4);
    Ok(())
}

// Grad mode

#[test]
fn test_no_grad_scope() -> wren::Result<()> {
    let x = leaf(&[1.0], &[1])?;
    {
        let _outer = no_grad();
        let y = x.square()?;
        assert!(!y.requires_grad());
        {
            let _inner = enable_grad();
            assert!(x.square()?.requires_grad());
        }
        assert!(!x.square()?.requires_grad());
    }
    assert!(x.square()?.requires_grad());
    Ok(())
}

#[test]
fn test_detach_cuts_graph() -> wren::Result<()> {
    let x = leaf(&[2.0], &[1])?;
    let y = x.square()?;
    let d = y.detach()?;
    assert!(!d.requires_grad());
    assert!(d.parents().is_empty());
    assert_eq!(d.to_vec::<f32>()?, vec![4.0]);
    Ok(())
}
