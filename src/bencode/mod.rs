mod decoder;
mod encoder;
mod value;

pub use decoder::decode;
pub use encoder::encode;
pub use value::BencodeValue;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_encoding() {
        let value = BencodeValue::Integer(42);
        assert_eq!(encode(&value), b"i42e");
    }

    #[test]
    fn test_string_encoding() {
        let value = BencodeValue::String(b"spam".to_vec());
        assert_eq!(encode(&value), b"4:spam");
    }

    #[test]
    fn test_list_encoding() {
        let value = BencodeValue::List(vec![
            BencodeValue::String(b"spam".to_vec()),
            BencodeValue::Integer(42),
        ]);
        assert_eq!(encode(&value), b"l4:spami42ee");
    }

    #[test]
    fn test_dict_encoding_sorts_keys() {
        let mut dict = std::collections::BTreeMap::new();
        dict.insert(b"foo".to_vec(), BencodeValue::Integer(42));
        dict.insert(b"bar".to_vec(), BencodeValue::String(b"spam".to_vec()));
        let value = BencodeValue::Dict(dict);
        assert_eq!(encode(&value), b"d3:bar4:spam3:fooi42ee");
    }

    #[test]
    fn test_roundtrip() {
        let original = BencodeValue::List(vec![
            BencodeValue::Integer(123),
            BencodeValue::String(b"test".to_vec()),
        ]);
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_negative_integer() {
        assert_eq!(decode(b"i-7e").unwrap(), BencodeValue::Integer(-7));
    }

    #[test]
    fn test_truncated_input_rejected() {
        assert!(decode(b"i42").is_err());
        assert!(decode(b"4:abc").is_err());
        assert!(decode(b"l4:spam").is_err());
        assert!(decode(b"d3:foo").is_err());
    }

    #[test]
    fn test_non_string_dict_key_rejected() {
        assert!(decode(b"di1ei2ee").is_err());
    }
}
