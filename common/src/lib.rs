#![warn(missing_docs)]

//! Common consists of the shared types between the different parts of the
//! ground station. More specifically, the events and commands exchanged with
//! the aircraft and the input device, and the wire format spoken by the
//! aircraft, are all stored here.

/// All structs and definitions related to communication between the ground
/// station, the input device and the aircraft.
pub mod comm;

/// Trait providing a method to create a pretty, terminal-friendly
/// representation of the underlying.
pub trait ToPrettyString {
  /// Provides a representation of the underlying which is preferable when
  /// displaying to the console but not as a raw string.
  ///
  /// ANSI codes such as color codes, for example, can be used in a "pretty
  /// string" but would be atypical in a `fmt::Display` implementation.
  fn to_pretty_string(&self) -> String;
}
