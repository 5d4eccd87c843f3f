use std::{
    sync::{Arc, Barrier},
    thread,
};

use overlay::{Behavior, ClassBuilder, OverrideKey, Runtime, RuntimeCreateInfo, Scope, Value};

const THREADS: usize = 8;
const ROUNDS: usize = 10_000;

/// What round `round` of worker `worker` does: install under one of three
/// keys, or remove one of them.
fn step(worker: usize, round: usize) -> (bool, OverrideKey) {
    let mixed = round.wrapping_mul(2_654_435_761).wrapping_add(worker * 97);
    let key = OverrideKey::new(format!("w{worker}-k{}", mixed % 3));
    (mixed % 5 < 3, key)
}

fn tag(key: &OverrideKey) -> Behavior {
    let key = key.clone();
    Behavior::new(move |m| {
        let below = m.forward()?;
        Ok(Value::from(format!(
            "{key}>{}",
            below.as_str().unwrap_or_default()
        )))
    })
}

fn replay(worker: usize) -> Vec<OverrideKey> {
    let mut stack: Vec<OverrideKey> = Vec::new();
    for round in 0..ROUNDS {
        let (install, key) = step(worker, round);
        match (install, stack.iter().position(|k| *k == key)) {
            (true, None) => stack.push(key),
            (true, Some(_)) => {}
            (false, Some(at)) => {
                stack.remove(at);
            }
            (false, None) => {}
        }
    }
    stack
}

#[test]
fn private_selectors_match_sequential_replay() {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = Runtime::new(RuntimeCreateInfo {
        name: Some("stress".into()),
        ..Default::default()
    });
    let mut builder = ClassBuilder::new("Shared");
    for worker in 0..THREADS {
        builder = builder.method(
            format!("sel{worker}"),
            Behavior::new(|_| Ok(Value::from("base"))),
        );
    }
    let class = runtime.define_class(builder).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let runtime = runtime.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let selector = format!("sel{worker}");
                let scope = Scope::Class(class);
                barrier.wait();
                for round in 0..ROUNDS {
                    let (install, key) = step(worker, round);
                    if install {
                        runtime
                            .install(scope.clone(), selector.as_str(), Some(key.clone()), tag(&key))
                            .unwrap();
                    } else {
                        runtime.remove(&scope, selector.as_str(), &key);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let object = runtime.instantiate(class).unwrap();
    for worker in 0..THREADS {
        let selector = format!("sel{worker}");
        let expected = replay(worker);
        assert_eq!(
            runtime.override_keys(&Scope::Class(class), selector.as_str()),
            expected,
            "worker {worker}"
        );

        let mut chain: String = expected.iter().rev().map(|k| format!("{k}>")).collect();
        chain.push_str("base");
        assert_eq!(runtime.send(&object, selector.as_str(), &[]), Ok(Value::from(chain)));
    }
}

#[test]
fn dispatch_while_other_threads_install() {
    let runtime = Runtime::new(RuntimeCreateInfo::default());
    let class = runtime
        .define_class(
            ClassBuilder::new("Reader").method("read", Behavior::new(|_| Ok(Value::from("base")))),
        )
        .unwrap();
    let object = runtime.instantiate(class).unwrap();

    let writer = {
        let runtime = runtime.clone();
        thread::spawn(move || {
            for round in 0..2_000 {
                let key = OverrideKey::new(format!("k{}", round % 4));
                runtime
                    .install(Scope::Class(class), "read", Some(key.clone()), tag(&key))
                    .unwrap();
                if round % 3 == 0 {
                    runtime.remove(&Scope::Class(class), "read", &key);
                }
            }
        })
    };

    for _ in 0..2_000 {
        let value = runtime.send(&object, "read", &[]).unwrap();
        assert!(value.as_str().unwrap().ends_with("base"));
    }
    writer.join().unwrap();
    assert_eq!(overlay::context::depth(), 0);
}
