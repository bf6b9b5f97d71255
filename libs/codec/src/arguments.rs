//! Argument lists: tuples appended as successive top-level values
//!
//! A method taking `(x, d)` receives two top-level values, not one struct.
//! [`Arguments`] and [`FromArguments`] map Rust tuples onto that shape; a
//! single return value is a 1-tuple.

use crate::error::CodecResult;
use crate::message::Message;
use bus_types::BusType;

/// Values appended to a message body one after another
pub trait Arguments {
    /// Concatenated signature of every argument
    fn signature() -> String;

    fn append_to(&self, message: &mut Message) -> CodecResult<()>;
}

/// Values read from a message body one after another
pub trait FromArguments: Sized {
    fn signature() -> String;

    fn read_from(message: &mut Message) -> CodecResult<Self>;
}

impl Arguments for () {
    fn signature() -> String {
        String::new()
    }

    fn append_to(&self, _message: &mut Message) -> CodecResult<()> {
        Ok(())
    }
}

impl FromArguments for () {
    fn signature() -> String {
        String::new()
    }

    fn read_from(_message: &mut Message) -> CodecResult<Self> {
        Ok(())
    }
}

macro_rules! impl_arguments {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: BusType),+> Arguments for ($($name,)+) {
            fn signature() -> String {
                let mut out = String::new();
                $(out.push_str(<$name as BusType>::signature().as_str());)+
                out
            }

            fn append_to(&self, message: &mut Message) -> CodecResult<()> {
                $(message.append(&self.$idx)?;)+
                Ok(())
            }
        }

        impl<$($name: BusType),+> FromArguments for ($($name,)+) {
            fn signature() -> String {
                <Self as Arguments>::signature()
            }

            fn read_from(message: &mut Message) -> CodecResult<Self> {
                Ok(($(message.read::<$name>()?,)+))
            }
        }
    };
}

impl_arguments!(A: 0);
impl_arguments!(A: 0, B: 1);
impl_arguments!(A: 0, B: 1, C: 2);
impl_arguments!(A: 0, B: 1, C: 2, D: 3);
impl_arguments!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_arguments!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_arguments!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_arguments!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
impl_arguments!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8);
impl_arguments!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9);
