use criterion::{Criterion, criterion_group, criterion_main};
use openworkers_bridge_v8::{Context, Engine, HostFunction, HostModule, HostValue};
use std::hint::black_box;

fn eval_benchmarks(c: &mut Criterion) {
    let engine = Engine::new();
    let ctx = Context::builder().timeout(5.0).build(&engine).unwrap();
    let script = ctx.compile("1 + 1", Some("bench.js")).unwrap();

    c.bench_function("eval_source", |b| {
        b.iter(|| ctx.eval(black_box("1 + 1")).unwrap())
    });

    c.bench_function("eval_compiled", |b| {
        b.iter(|| ctx.eval(black_box(&script)).unwrap())
    });

    c.bench_function("eval_unbounded", |b| {
        let ctx = Context::builder().build(&engine).unwrap();
        b.iter(|| ctx.eval(black_box(&script)).unwrap())
    });
}

fn call_benchmarks(c: &mut Criterion) {
    let engine = Engine::new();
    let ctx = Context::builder().build(&engine).unwrap();

    let add = ctx.eval("(a, b) => a + b").unwrap();
    let add = add.as_js_function().unwrap().clone();

    let args = [HostValue::from(1), HostValue::from(2)];
    c.bench_function("js_function_call", |b| {
        b.iter(|| add.call(black_box(&args)).unwrap())
    });

    ctx.setitem(
        "noop",
        HostFunction::new("noop", |_| Ok(HostValue::Undefined)),
    )
    .unwrap();
    let loop_script = ctx
        .compile("for (let i = 0; i < 1000; i++) noop(i)", None)
        .unwrap();

    c.bench_function("host_function_1000_calls", |b| {
        b.iter(|| ctx.eval(&loop_script).unwrap())
    });

    let module = HostValue::object(HostModule::new("m").with("x", 1));
    c.bench_function("setitem_cached_proxy", |b| {
        b.iter(|| ctx.setitem("m", black_box(module.clone())).unwrap())
    });
}

fn async_benchmarks(c: &mut Criterion) {
    let engine = Engine::new();
    let ctx = Context::builder().build(&engine).unwrap();

    let sync = ctx.eval("(x) => x").unwrap();
    let resolved = ctx.eval("async (x) => x").unwrap();

    c.bench_function("async_call_plain", |b| {
        b.iter(|| ctx.async_call_future(&sync, &[1.into()]).unwrap())
    });

    c.bench_function("async_call_resolved", |b| {
        b.iter(|| ctx.async_call_future(&resolved, &[1.into()]).unwrap())
    });
}

criterion_group!(benches, eval_benchmarks, call_benchmarks, async_benchmarks);
criterion_main!(benches);
