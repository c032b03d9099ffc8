//! The tracing-runtime payload dropped into the instrumented project.
//!
//! The wrappers' print statements are the event grammar: one line per event,
//! sentinel `[GTRACE]`, whitespace-separated fields, goroutine ordinal taken
//! from the runtime stack header, wall-clock nanosecond timestamps.

use crate::InstrumentError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory (and Go package) name of the generated runtime.
pub const RUNTIME_DIR: &str = "gtrace";

/// File name of the generated runtime source.
pub const RUNTIME_FILE: &str = "gtrace.go";

const RUNTIME_SOURCE: &str = r#"package gtrace

import (
	"fmt"
	"reflect"
	"runtime"
	"strings"
	"time"
)

// Wrap invokes fn with args through reflection, bracketing the call with
// func_start and func_end events for the goroutine executing it.
func Wrap(fn interface{}, args ...interface{}) []interface{} {
	name := runtime.FuncForPC(reflect.ValueOf(fn).Pointer()).Name()
	if name == "" {
		name = "anonymous"
	}
	id := goroutineID()
	site := callSite(1)
	fmt.Printf("[GTRACE] func_start %s %s %s %d\n", id, name, site, time.Now().UnixNano())

	v := reflect.ValueOf(fn)
	if v.Kind() != reflect.Func {
		panic("gtrace.Wrap: not a function")
	}
	t := v.Type()
	if len(args) != t.NumIn() {
		panic("gtrace.Wrap: wrong argument count")
	}
	in := make([]reflect.Value, len(args))
	for i, arg := range args {
		av := reflect.ValueOf(arg)
		if !av.Type().ConvertibleTo(t.In(i)) {
			panic(fmt.Sprintf("gtrace.Wrap: argument %d is not convertible to %v", i, t.In(i)))
		}
		in[i] = av.Convert(t.In(i))
	}
	out := v.Call(in)
	results := make([]interface{}, len(out))
	for i, val := range out {
		results[i] = val.Interface()
	}
	fmt.Printf("[GTRACE] func_end %s %s %s %d\n", id, name, site, time.Now().UnixNano())
	return results
}

// WrappedMakeChan emits channel_create for a freshly made channel and passes
// it through unchanged.
func WrappedMakeChan[T any](name string, ch chan T) chan T {
	fmt.Printf("[GTRACE] channel_create %s %s %d %d\n", name, callSite(1), time.Now().UnixNano(), cap(ch))
	return ch
}

// WrappedSend emits channel_send, then performs the send.
func WrappedSend[T any](ch chan<- T, val T, name string) {
	fmt.Printf("[GTRACE] channel_send %s %s %s %d\n", goroutineID(), name, callSite(1), time.Now().UnixNano())
	ch <- val
}

// WrappedReceive emits channel_receive, then performs the receive.
func WrappedReceive[T any](ch <-chan T, name string) T {
	fmt.Printf("[GTRACE] channel_receive %s %s %s %d\n", goroutineID(), name, callSite(1), time.Now().UnixNano())
	return <-ch
}

// WrappedClose emits channel_close and closes the channel; a close panic is
// reported as channel_close_error and suppressed.
func WrappedClose[T any](ch chan<- T, name string) {
	id := goroutineID()
	site := callSite(1)
	ts := time.Now().UnixNano()
	fmt.Printf("[GTRACE] channel_close %s %s %s %d\n", id, name, site, ts)
	defer func() {
		if r := recover(); r != nil {
			fmt.Printf("[GTRACE] channel_close_error %s %s %s %d %v\n", id, name, site, ts, r)
		}
	}()
	close(ch)
}

// callSite reports the caller's file:line.
func callSite(skip int) string {
	_, file, line, ok := runtime.Caller(skip + 1)
	if !ok {
		return "unknown:0"
	}
	return fmt.Sprintf("%s:%d", file, line)
}

// goroutineID extracts the ordinal from the stack header
// ("goroutine N [running]:").
func goroutineID() string {
	buf := make([]byte, 64)
	n := runtime.Stack(buf, false)
	header, _, _ := strings.Cut(string(buf[:n]), "\n")
	fields := strings.Fields(header)
	if len(fields) < 2 {
		return "unknown"
	}
	return fields[1]
}
"#;

/// Materialize `<mirror_root>/gtrace/gtrace.go`. Returns the written path.
pub fn write_runtime_package(mirror_root: &Path) -> Result<PathBuf, InstrumentError> {
    let dir = mirror_root.join(RUNTIME_DIR);
    fs::create_dir_all(&dir).map_err(|e| InstrumentError::io(&dir, e))?;
    set_mode(&dir, 0o755).map_err(|e| InstrumentError::io(&dir, e))?;
    let path = dir.join(RUNTIME_FILE);
    fs::write(&path, RUNTIME_SOURCE).map_err(|e| InstrumentError::io(&path, e))?;
    set_mode(&path, 0o644).map_err(|e| InstrumentError::io(&path, e))?;
    info!(target: "instrument", path = %path.display(), "runtime_written");
    Ok(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_lands_under_gtrace_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_runtime_package(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("gtrace").join("gtrace.go"));
        let body = fs::read_to_string(path).unwrap();
        assert!(body.starts_with("package gtrace\n"));
        for wrapper in [
            "func Wrap(",
            "func WrappedMakeChan[",
            "func WrappedSend[",
            "func WrappedReceive[",
            "func WrappedClose[",
        ] {
            assert!(body.contains(wrapper), "missing {wrapper}");
        }
    }

    #[test]
    fn event_prints_carry_the_sentinel() {
        for kind in [
            "func_start",
            "func_end",
            "channel_create",
            "channel_send",
            "channel_receive",
            "channel_close",
            "channel_close_error",
        ] {
            assert!(
                RUNTIME_SOURCE.contains(&format!("[GTRACE] {kind} ")),
                "missing event kind {kind}"
            );
        }
    }
}
