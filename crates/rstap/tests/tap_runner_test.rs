//! End-to-end run through `rstap::run`, the way a `harness = false` test
//! target uses the crate. Every assertion here passes, so the process exits 0.

use std::thread;
use std::time::Duration;

fn main() {
    rstap::run(|t| {
        t.comment("rstap end-to-end");

        t.test("arithmetic", |t| {
            t.plan(3);
            t.equal(2 + 3, 5, "adds");
            t.not_equal(3 * 4, 11, "multiplies");
            t.ok(10 / 2 == 5, "divides");
        });

        t.test("nesting", |t| {
            t.test("inner", |t| {
                t.test("innermost", |t| {
                    t.pass("deep");
                    t.end();
                });
                t.pass("inner");
                t.end();
            });
            t.pass("outer");
            t.end();
        });

        t.test("deferred", |t| {
            t.timeout_after(5_000);
            let remote = t.remote();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                remote.ok(true, "finished on another thread");
                remote.end();
            });
        });

        t.test("results", |t| {
            let parsed: Result<u32, std::num::ParseIntError> = "42".parse();
            t.error(&parsed, "parses");
            t.equal(parsed.ok(), Some(42), "value");
            t.skip("not on this platform");
            t.end();
        });

        t.skip_test("disabled", |t| {
            t.fail("never runs");
            t.end();
        });
    });
}
