use gramstep::{
    ll::{self, LlPipeline},
    lr0::{self, Lr0Pipeline},
    lr1::{self, Lr1Pipeline},
    pipeline::{self, Source},
    syntax::lexicon::lexicon,
};
use std::{env, path::PathBuf, sync::Arc};

/// Result codes of each algorithm, in the order LL, LR(0), SLR(1), LR(1),
/// LALR(1).
type Expected = [u32; 5];

fn check(name: &str, expected: Expected) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let path = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap())
        .join(format!("tests/{}.grammar", name));
    let source = Source::read(&path).unwrap();
    let lexicon = Arc::new(lexicon().unwrap());

    let ll = LlPipeline::new(ll::Config::new(), lexicon.clone(), source.clone());
    let lr0 = Lr0Pipeline::new(lr0::Config::new(), lexicon.clone(), source.clone());
    let slr = Lr0Pipeline::new(
        lr0::Config::new().use_slr().clone(),
        lexicon.clone(),
        source.clone(),
    );
    let lr1 = Lr1Pipeline::new(lr1::Config::new(), lexicon.clone(), source.clone());
    let lalr = Lr1Pipeline::new(lr1::Config::new().use_lalr().clone(), lexicon, source);

    let actual = [
        pipeline::run(ll).unwrap().code(),
        pipeline::run(lr0).unwrap().code(),
        pipeline::run(slr).unwrap().code(),
        pipeline::run(lr1).unwrap().code(),
        pipeline::run(lalr).unwrap().code(),
    ];
    assert_eq!(actual, expected, "result codes of {}", name);
}

macro_rules! define_tests {
    ($($name:ident => $expected:expr),*$(,)?) => {$(
        #[test]
        fn $name() {
            check(stringify!($name), $expected);
        }
    )*};
}

define_tests! {
    expression => [0, 3, 0, 0, 0],
    assignment => [0, 3, 3, 0, 0],
    lalr_reduce => [2, 3, 3, 0, 3],
    dangling_else => [2, 3, 3, 3, 3],
    balanced => [0, 3, 0, 0, 0],
    json => [0, 3, 0, 0, 0],
}
