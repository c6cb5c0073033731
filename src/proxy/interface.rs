//! Generated per-method bindings over [`Invoke`](super::Invoke).

/// Declare a typed binding for a worker's methods.
///
/// Each declared method forwards to [`Invoke::invoke`](crate::proxy::Invoke::invoke)
/// under its own name, with its arguments packed into a tuple. The binding
/// wraps any `Invoke` implementor: a [`RemoteProxy`](crate::RemoteProxy), a
/// [`Pool`](crate::Pool), or a reference or `Arc` of one. Over a pool, every
/// call is routed when it is made, so mapping a method over many inputs
/// spreads them over the members.
///
/// ```
/// use workwire::remote_interface;
///
/// remote_interface! {
///     /// Calculator worker.
///     pub struct Calc {
///         fn add(a: i64, b: i64) -> i64;
///         fn square(x: i64) -> i64;
///         fn ping() -> String;
///     }
/// }
///
/// async fn total(calc: &Calc<workwire::Pool>) -> workwire::Result<i64> {
///     let squares = futures_total((1..=4).map(|x| calc.square(x))).await?;
///     calc.add(squares, 1).await
/// }
/// # async fn futures_total(
/// #     replies: impl Iterator<Item = workwire::proxy::PendingReply<i64>>,
/// # ) -> workwire::Result<i64> {
/// #     let mut sum = 0;
/// #     for r in replies.collect::<Vec<_>>() { sum += r.await?; }
/// #     Ok(sum)
/// # }
/// ```
#[macro_export]
macro_rules! remote_interface {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fn_meta:meta])*
                fn $method:ident ( $( $arg:ident : $ty:ty ),* $(,)? ) -> $ret:ty ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name<I> {
            target: I,
        }

        impl<I: $crate::proxy::Invoke> $name<I> {
            /// Bind to a call target.
            $vis fn new(target: I) -> Self {
                Self { target }
            }

            /// The call target.
            $vis fn target(&self) -> &I {
                &self.target
            }

            /// Unwrap the call target.
            $vis fn into_inner(self) -> I {
                self.target
            }

            $(
                $(#[$fn_meta])*
                $vis fn $method(&self, $( $arg: $ty ),*) -> $crate::proxy::PendingReply<$ret> {
                    $crate::proxy::Invoke::invoke(&self.target, stringify!($method), &($( $arg, )*))
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::channel::local;
    use crate::dispatch::{Dispatcher, HandlerError};
    use crate::proxy::{ProxyConfig, RemoteProxy};

    remote_interface! {
        struct Calc {
            fn add(a: i64, b: i64) -> i64;
            fn negate(x: i64) -> i64;
            fn answer() -> u32;
        }
    }

    #[tokio::test]
    async fn test_generated_methods_call_through() {
        let (controller, worker) = local::pair();
        let dispatcher = Dispatcher::builder()
            .handle("add", |(a, b): (i64, i64), _ctx| async move {
                Ok::<_, HandlerError>(a + b)
            })
            .handle("negate", |(x,): (i64,), _ctx| async move { Ok::<_, HandlerError>(-x) })
            .handle("answer", |_: (), _ctx| async { Ok::<_, HandlerError>(42u32) })
            .build()
            .unwrap();
        tokio::spawn(async move { dispatcher.serve(worker).await });

        let calc = Calc::new(RemoteProxy::connect(controller, ProxyConfig::default()));
        assert_eq!(calc.add(1, 2).await.unwrap(), 3);
        assert_eq!(calc.negate(5).await.unwrap(), -5);
        assert_eq!(calc.answer().await.unwrap(), 42);
        assert_eq!(calc.target().pending_calls(), 0);
    }
}
