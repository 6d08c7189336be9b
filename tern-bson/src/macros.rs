//! Document and array literals.

/// Build a [`Document`](crate::Document) from `key => value` pairs.
///
/// Values go through `Into<Value>`, so unsuffixed integer literals become
/// Int32 and float literals become Double.
///
/// ```
/// use tern_bson::doc;
///
/// let filter = doc! { "age" => doc! { "$gte" => 21 }, "active" => true };
/// assert_eq!(filter.len(), 2);
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ( $( $key:expr => $value:expr ),+ $(,)? ) => {{
        let mut document = $crate::Document::new();
        $( document.append($key, $value); )+
        document
    }};
}

/// Build a `Vec<Value>` from a list of values.
///
/// ```
/// use tern_bson::{array, Value};
///
/// let items = array![1, "two", 3.0];
/// assert_eq!(items[1], Value::from("two"));
/// ```
#[macro_export]
macro_rules! array {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ( $( $value:expr ),+ $(,)? ) => {
        vec![ $( $crate::Value::from($value) ),+ ]
    };
}
