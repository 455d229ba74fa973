//! The `Foo` service served by `tinyrpc server`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tinyrpc_server::Service;

/// Argument of every `Foo` method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Args {
    pub num1: i64,
    pub num2: i64,
}

pub struct Foo;

impl Foo {
    pub fn sum(&self, args: Args, reply: &mut i64) -> Result<(), String> {
        *reply = args.num1 + args.num2;
        Ok(())
    }

    /// Sleeps `num1` seconds before summing.
    pub fn sleep(&self, args: Args, reply: &mut i64) -> Result<(), String> {
        let secs = u64::try_from(args.num1).map_err(|_| format!("negative sleep: {}", args.num1))?;
        std::thread::sleep(Duration::from_secs(secs));
        *reply = args.num1 + args.num2;
        Ok(())
    }
}

/// Builds the `Foo` service with `Sum` and `Sleep`.
pub fn foo_service() -> Service {
    Service::builder("Foo", Foo)
        .method("Sum", Foo::sum)
        .method("Sleep", Foo::sleep)
        .build()
}
